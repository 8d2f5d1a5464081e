//! Scripted environments for exercising rollouts without a simulation.

use std::{
    collections::BTreeMap,
    io,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use marbler_env::{
    Action, Environment, EnvironmentError, EnvironmentLauncher, ResultEntry, Session,
    SessionResource, StateSnapshot, Vec3,
};

/// Name of the scripted opponent in every race.
pub(crate) const RIVAL: &str = "rival";
/// Opponent finish time. An agent finishing at `t` scores `0.5 * t / max(t, 100) + 0.5`.
pub(crate) const RIVAL_FINISH: f32 = 100.0;

/// Behavior of one scripted session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Script {
    /// Reports `steps` running states, then the race results.
    Finish { steps: usize, finish_time: f32 },
    FailSpawn,
    FailConnect,
    /// The transport breaks after `steps` states.
    DropAfter { steps: usize },
    /// Never reaches a terminal state.
    Endless,
    /// The environment panics on its first state fetch.
    Panic,
}

#[derive(Debug)]
struct Tracker(Arc<AtomicUsize>);

impl SessionResource for Tracker {
    fn terminate(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub(crate) struct ScriptedConnection {
    player_name: String,
    script: Script,
    states: usize,
}

impl Environment for ScriptedConnection {
    fn get_state(&mut self) -> Result<StateSnapshot, EnvironmentError> {
        self.states += 1;
        let running = StateSnapshot {
            linear_velocity: Vec3::new(1.0, 0.0, 0.0),
            ..StateSnapshot::default()
        };
        match self.script {
            Script::Finish { steps, finish_time } if self.states > steps => Ok(StateSnapshot {
                finished: true,
                results: vec![
                    ResultEntry {
                        name: self.player_name.clone(),
                        finish_time: Some(finish_time),
                        last_touched_checkpoint_id: Some(5),
                        last_touched_checkpoint_time: Some(9.0),
                    },
                    ResultEntry {
                        name: RIVAL.to_owned(),
                        finish_time: Some(RIVAL_FINISH),
                        last_touched_checkpoint_id: Some(5),
                        last_touched_checkpoint_time: Some(9.0),
                    },
                ],
                ..running
            }),
            Script::DropAfter { steps } if self.states > steps => Err(EnvironmentError::Rpc {
                method: "/marble.MarbleService/GetState",
                source: Box::new(tonic::Status::unavailable("scripted drop")),
            }),
            Script::Panic => panic!("scripted environment panic"),
            _ => Ok(running),
        }
    }

    fn send_action(&mut self, _action: Action) -> Result<(), EnvironmentError> {
        Ok(())
    }
}

/// Launcher handing out scripted sessions, one script per slot.
#[derive(Debug)]
pub(crate) struct ScriptedLauncher {
    default: Script,
    scripts: BTreeMap<usize, Script>,
    spawned: AtomicUsize,
    terminated: Arc<AtomicUsize>,
}

impl ScriptedLauncher {
    pub(crate) fn new(default: Script) -> Self {
        Self {
            default,
            scripts: BTreeMap::new(),
            spawned: AtomicUsize::new(0),
            terminated: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn with(mut self, slot: usize, script: Script) -> Self {
        self.scripts.insert(slot, script);
        self
    }

    fn script(&self, slot: usize) -> Script {
        self.scripts.get(&slot).copied().unwrap_or(self.default)
    }

    /// Sessions spawned so far.
    pub(crate) fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    /// Sessions whose resources were released so far.
    pub(crate) fn terminated(&self) -> usize {
        self.terminated.load(Ordering::SeqCst)
    }
}

impl EnvironmentLauncher for ScriptedLauncher {
    type Connection = ScriptedConnection;

    fn spawn(
        &self,
        slot: usize,
        player_name: &str,
    ) -> Result<Session<Self::Connection>, EnvironmentError> {
        if self.script(slot) == Script::FailSpawn {
            return Err(EnvironmentError::Spawn {
                program: "scripted-server".to_owned(),
                source: io::Error::new(io::ErrorKind::NotFound, "scripted spawn failure"),
            });
        }
        self.spawned.fetch_add(1, Ordering::SeqCst);
        let mut session = Session::new(slot, player_name);
        session.push_resource(Tracker(Arc::clone(&self.terminated)));
        Ok(session)
    }

    fn connect(&self, session: &mut Session<Self::Connection>) -> Result<(), EnvironmentError> {
        let script = self.script(session.slot());
        if script == Script::FailConnect {
            return Err(EnvironmentError::Connect {
                addr: format!("127.0.0.1:{}", 50051 + session.slot()),
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "scripted refusal"),
            });
        }
        let connection = ScriptedConnection {
            player_name: session.player_name().to_owned(),
            script,
            states: 0,
        };
        session.attach(connection)
    }
}

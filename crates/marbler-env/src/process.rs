//! Launching simulation sessions as child processes.
//!
//! One session is a dedicated race server plus one client for the agent's
//! marble. The client serves the state/action gRPC service on the slot's RPC
//! port, which is reached through a [`BridgeConnection`].

use std::{
    io,
    path::PathBuf,
    process::{Child, Command, Stdio},
    thread,
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    EnvironmentError, EnvironmentLauncher, PortLayout, Session, SessionResource, SlotPorts,
    bridge::{BridgeConnection, BridgeOptions},
};

/// How to start and reach the simulation binaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub server_executable: PathBuf,
    pub client_executable: PathBuf,
    /// Host the client uses to reach the server.
    pub server_host: String,
    /// Host the trainer uses to reach the client's RPC service.
    pub rpc_host: String,
    pub ports: PortLayout,
    /// Players the server waits for before the race starts.
    pub players: u8,
    /// Upper bound on race duration, enforced by the server.
    pub max_game_seconds: u32,
    /// World seed. Server and client must agree on it.
    pub world_seed: u32,
    pub headless: bool,
    pub low_gpu: bool,
    /// Pause after spawning each binary before it is expected to listen.
    pub startup_delay_ms: u64,
    pub connect_timeout_ms: u64,
    /// Read/write timeout for state and action calls. `0` disables it.
    pub io_timeout_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            server_executable: PathBuf::from("./server"),
            client_executable: PathBuf::from("./client"),
            server_host: "127.0.0.1".to_owned(),
            rpc_host: "::1".to_owned(),
            ports: PortLayout::default(),
            players: 1,
            max_game_seconds: 120,
            world_seed: 1234,
            headless: true,
            low_gpu: false,
            startup_delay_ms: 2000,
            connect_timeout_ms: 10_000,
            io_timeout_ms: 5000,
        }
    }
}

impl SimulationConfig {
    fn bridge_options(&self) -> BridgeOptions {
        BridgeOptions {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            io_timeout: (self.io_timeout_ms > 0).then(|| Duration::from_millis(self.io_timeout_ms)),
            ..BridgeOptions::default()
        }
    }

    fn server_command(&self, ports: &SlotPorts) -> Command {
        let mut command = Command::new(&self.server_executable);
        command
            .arg("--auth-port")
            .arg(ports.auth_port.to_string())
            .arg("--game-port")
            .arg(ports.game_port.to_string())
            .arg("--players")
            .arg(self.players.to_string())
            .arg("--max-game-seconds")
            .arg(self.max_game_seconds.to_string())
            .arg("--seed")
            .arg(self.world_seed.to_string());
        if self.headless {
            command.arg("--headless");
        }
        if self.low_gpu {
            command.arg("--low-gpu");
        }
        command
    }

    fn client_command(&self, ports: &SlotPorts, player_name: &str) -> Command {
        let mut command = Command::new(&self.client_executable);
        command
            .arg("--auth-port")
            .arg(ports.auth_port.to_string())
            .arg("--server")
            .arg(&self.server_host)
            .arg("--client-port")
            .arg(ports.client_port.to_string())
            .arg("--grpc-port")
            .arg(ports.rpc_port.to_string())
            .arg("--name")
            .arg(player_name)
            .arg("--seed")
            .arg(self.world_seed.to_string());
        command
    }
}

/// A spawned child process that is killed when its session terminates.
#[derive(Debug)]
pub struct ManagedProcess {
    label: &'static str,
    child: Child,
}

impl ManagedProcess {
    pub fn spawn(label: &'static str, mut command: Command) -> Result<Self, EnvironmentError> {
        let program = command.get_program().to_string_lossy().into_owned();
        let child = command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| EnvironmentError::Spawn { program, source })?;
        tracing::debug!(label, pid = child.id(), "process spawned");
        Ok(Self { label, child })
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.child.id()
    }
}

impl SessionResource for ManagedProcess {
    fn terminate(&mut self) {
        let pid = self.child.id();
        match self.child.kill() {
            Ok(()) => {}
            // already exited
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => {}
            Err(e) => tracing::warn!(label = self.label, pid, error = %e, "failed to kill process"),
        }
        if let Err(e) = self.child.wait() {
            tracing::warn!(label = self.label, pid, error = %e, "failed to reap process");
        }
        tracing::debug!(label = self.label, pid, "process terminated");
    }
}

/// Launches one server/client process pair per rollout slot.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    config: SimulationConfig,
}

impl ProcessLauncher {
    #[must_use]
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    fn slot_ports(&self, slot: usize) -> Result<SlotPorts, EnvironmentError> {
        self.config
            .ports
            .slot(slot)
            .ok_or(EnvironmentError::PortRange { slot })
    }

    fn wait_for_startup(&self) {
        if self.config.startup_delay_ms > 0 {
            thread::sleep(Duration::from_millis(self.config.startup_delay_ms));
        }
    }
}

impl EnvironmentLauncher for ProcessLauncher {
    type Connection = BridgeConnection;

    fn spawn(
        &self,
        slot: usize,
        player_name: &str,
    ) -> Result<Session<Self::Connection>, EnvironmentError> {
        let ports = self.slot_ports(slot)?;
        let mut session = Session::new(slot, player_name);

        // Pushed one by one so that a failing client spawn still kills the server.
        session.push_resource(ManagedProcess::spawn(
            "server",
            self.config.server_command(&ports),
        )?);
        self.wait_for_startup();
        session.push_resource(ManagedProcess::spawn(
            "client",
            self.config.client_command(&ports, player_name),
        )?);
        self.wait_for_startup();

        tracing::debug!(
            slot,
            game_port = ports.game_port,
            rpc_port = ports.rpc_port,
            "simulation spawned"
        );
        Ok(session)
    }

    fn connect(&self, session: &mut Session<Self::Connection>) -> Result<(), EnvironmentError> {
        let ports = self.slot_ports(session.slot())?;
        let connection = BridgeConnection::connect(
            &self.config.rpc_host,
            ports.rpc_port,
            &self.config.bridge_options(),
        )?;
        session.attach(connection)
    }
}

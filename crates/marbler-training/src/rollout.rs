//! Concurrent rollouts, one per individual.
//!
//! The coordinator fans out one worker thread per individual. Each worker owns
//! a freshly spawned simulation session and drives it through
//!
//! ```text
//! INIT -> CONNECTING -> RUNNING -> FINISHED
//!   \          \           \
//!    +----------+-----------+---> FAILED
//! ```
//!
//! then the coordinator joins every worker before returning. Nothing about a
//! generation's rollouts is visible to the caller until all of them have ended.
//!
//! Failures never escape a worker: spawn and connection errors, broken
//! transport, step limits, aborts and even panics in a policy are turned into a
//! [`RolloutStatus::Failed`] report. The worker's [`Session`] is dropped on
//! every exit path, which kills the simulation processes it spawned.
//!
//! [`Session`]: marbler_env::Session

use std::{
    collections::BTreeMap,
    error::Error,
    fmt::Write as _,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use marbler_env::{
    Action, Environment as _, EnvironmentError, EnvironmentLauncher, ResultEntry, StateSnapshot,
};
use marbler_policy::{
    ModelError, Policy,
    model::MlpSpec,
    model_policy::ModelPolicy,
};
use serde::{Deserialize, Serialize};

use crate::population::{Individual, Population};

/// One state/action exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub state: StateSnapshot,
    pub action: Action,
}

/// Everything recorded during one rollout.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutTelemetry {
    pub steps: Vec<Step>,
    /// True once the environment reported the race as over.
    pub finished: bool,
    /// Results of every competitor, present only when `finished`.
    pub results: Vec<ResultEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum FailureKind {
    #[display("policy")]
    Policy,
    #[display("spawn")]
    Spawn,
    #[display("connect")]
    Connect,
    #[display("transport")]
    Transport,
    #[display("step-limit")]
    StepLimit,
    #[display("aborted")]
    Aborted,
    #[display("panicked")]
    Panicked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloutFailure {
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, derive_more::IsVariant)]
pub enum RolloutStatus {
    Finished,
    Failed(RolloutFailure),
}

/// Outcome of one individual's rollout.
#[derive(Debug, Clone)]
pub struct RolloutReport {
    pub individual: usize,
    pub player_name: String,
    pub status: RolloutStatus,
    pub telemetry: RolloutTelemetry,
    pub elapsed: Duration,
}

impl RolloutReport {
    #[must_use]
    pub fn failure(&self) -> Option<&RolloutFailure> {
        match &self.status {
            RolloutStatus::Finished => None,
            RolloutStatus::Failed(failure) => Some(failure),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
enum RolloutPhase {
    #[display("INIT")]
    Init,
    #[display("CONNECTING")]
    Connecting,
    #[display("RUNNING")]
    Running,
}

/// Cooperative cancellation shared by every rollout of a run.
///
/// Raising it makes running rollouts stop at their next step and end as
/// [`FailureKind::Aborted`].
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutConfig {
    /// Pause after each step to match the simulation's pace.
    pub step_delay_ms: u64,
    /// Steps after which a rollout is abandoned. The simulation's own race
    /// timeout normally ends episodes first.
    pub max_steps: Option<usize>,
    /// Keep raw screen frames in recorded telemetry.
    pub keep_frames: bool,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            step_delay_ms: 200,
            max_steps: None,
            keep_frames: false,
        }
    }
}

/// Builds the policy an individual races with.
pub trait PolicyFactory: Sync {
    fn policy_for(&self, individual: &Individual) -> Result<Box<dyn Policy>, ModelError>;
}

/// Races every individual with a model built from its own parameters.
#[derive(Debug, Clone, Copy)]
pub struct ModelPolicyFactory {
    pub spec: MlpSpec,
}

impl PolicyFactory for ModelPolicyFactory {
    fn policy_for(&self, individual: &Individual) -> Result<Box<dyn Policy>, ModelError> {
        Ok(Box::new(ModelPolicy::new(self.spec, individual.parameters())?))
    }
}

/// Races every individual with the same fixed policy, ignoring parameters.
#[derive(Debug, Clone)]
pub struct FixedPolicyFactory<P>(pub P);

impl<P> PolicyFactory for FixedPolicyFactory<P>
where
    P: Policy + Clone + 'static,
{
    fn policy_for(&self, _individual: &Individual) -> Result<Box<dyn Policy>, ModelError> {
        Ok(Box::new(self.0.clone()))
    }
}

#[derive(Debug)]
pub struct RolloutCoordinator<L> {
    launcher: L,
    config: RolloutConfig,
    player_name_prefix: String,
}

impl<L> RolloutCoordinator<L>
where
    L: EnvironmentLauncher,
{
    pub fn new(launcher: L, config: RolloutConfig, player_name_prefix: impl Into<String>) -> Self {
        Self {
            launcher,
            config,
            player_name_prefix: player_name_prefix.into(),
        }
    }

    #[must_use]
    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Name the individual races under. Names are recycled every generation.
    #[must_use]
    pub fn player_name(&self, id: usize) -> String {
        format!("{}-{id}", self.player_name_prefix)
    }

    /// Runs one rollout per individual concurrently and waits for all of them.
    ///
    /// The returned map has one report per individual, keyed by id.
    pub fn run<F>(
        &self,
        population: &Population,
        policies: &F,
        abort: &AbortSignal,
    ) -> BTreeMap<usize, RolloutReport>
    where
        F: PolicyFactory + ?Sized,
    {
        let parent = tracing::Span::current();
        thread::scope(|s| {
            let workers = population
                .individuals()
                .iter()
                .map(|individual| {
                    let id = individual.id();
                    let name = self.player_name(id);
                    let span = tracing::info_span!(
                        parent: &parent,
                        "rollout",
                        individual = id,
                        player = %name
                    );
                    let worker_name = name.clone();
                    let handle = thread::Builder::new()
                        .name(format!("rollout-{id}"))
                        .spawn_scoped(s, move || {
                            let _enter = span.enter();
                            self.run_one(individual, worker_name, policies, abort)
                        });
                    (id, name, handle)
                })
                .collect::<Vec<_>>();

            workers
                .into_iter()
                .map(|(id, name, handle)| {
                    let report = match handle {
                        Ok(handle) => handle.join().unwrap_or_else(|_| {
                            tracing::error!(individual = id, "rollout worker panicked");
                            failed_report(id, name, FailureKind::Panicked, "worker panicked")
                        }),
                        Err(e) => {
                            tracing::error!(
                                individual = id,
                                error = %e,
                                "failed to start rollout worker"
                            );
                            failed_report(id, name, FailureKind::Spawn, &e.to_string())
                        }
                    };
                    (id, report)
                })
                .collect()
        })
    }

    fn run_one<F>(
        &self,
        individual: &Individual,
        player_name: String,
        policies: &F,
        abort: &AbortSignal,
    ) -> RolloutReport
    where
        F: PolicyFactory + ?Sized,
    {
        let started = Instant::now();
        let mut telemetry = RolloutTelemetry::default();
        let status = match self.drive(individual, &player_name, policies, abort, &mut telemetry) {
            Ok(()) => {
                tracing::info!(
                    steps = telemetry.steps.len(),
                    elapsed_ms = started.elapsed().as_millis(),
                    "rollout finished"
                );
                RolloutStatus::Finished
            }
            Err(failure) => {
                tracing::warn!(
                    kind = %failure.kind,
                    error = %failure.message,
                    steps = telemetry.steps.len(),
                    "rollout failed"
                );
                RolloutStatus::Failed(failure)
            }
        };
        RolloutReport {
            individual: individual.id(),
            player_name,
            status,
            telemetry,
            elapsed: started.elapsed(),
        }
    }

    fn drive<F>(
        &self,
        individual: &Individual,
        player_name: &str,
        policies: &F,
        abort: &AbortSignal,
        telemetry: &mut RolloutTelemetry,
    ) -> Result<(), RolloutFailure>
    where
        F: PolicyFactory + ?Sized,
    {
        let mut phase = RolloutPhase::Init;
        let policy = policies
            .policy_for(individual)
            .map_err(|e| failure(FailureKind::Policy, &e))?;
        let mut session = self
            .launcher
            .spawn(individual.id(), player_name)
            .map_err(|e| failure(FailureKind::Spawn, &e))?;

        transition(&mut phase, RolloutPhase::Connecting);
        self.launcher
            .connect(&mut session)
            .map_err(|e| failure(FailureKind::Connect, &e))?;

        transition(&mut phase, RolloutPhase::Running);
        let step_delay = Duration::from_millis(self.config.step_delay_ms);
        loop {
            if abort.is_raised() {
                return Err(RolloutFailure {
                    kind: FailureKind::Aborted,
                    message: "abort requested".to_owned(),
                });
            }
            if let Some(max_steps) = self.config.max_steps {
                if telemetry.steps.len() >= max_steps {
                    return Err(RolloutFailure {
                        kind: FailureKind::StepLimit,
                        message: format!("no terminal state after {max_steps} steps"),
                    });
                }
            }

            let mut state = session.get_state().map_err(transport_failure)?;
            let action = policy.decide(&state);
            session.send_action(action).map_err(transport_failure)?;

            let finished = state.finished;
            let results = if finished {
                state.results.clone()
            } else {
                vec![]
            };
            if !self.config.keep_frames {
                state.screen = vec![];
            }
            telemetry.steps.push(Step { state, action });

            if finished {
                telemetry.finished = true;
                telemetry.results = results;
                session.terminate();
                return Ok(());
            }
            if !step_delay.is_zero() {
                thread::sleep(step_delay);
            }
        }
    }
}

fn transition(phase: &mut RolloutPhase, next: RolloutPhase) {
    tracing::debug!(from = %phase, to = %next, "rollout phase");
    *phase = next;
}

fn transport_failure(error: EnvironmentError) -> RolloutFailure {
    failure(FailureKind::Transport, &error)
}

fn failure(kind: FailureKind, error: &dyn Error) -> RolloutFailure {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(e) = source {
        let _ = write!(message, ": {e}");
        source = e.source();
    }
    RolloutFailure { kind, message }
}

fn failed_report(
    id: usize,
    player_name: String,
    kind: FailureKind,
    message: &str,
) -> RolloutReport {
    RolloutReport {
        individual: id,
        player_name,
        status: RolloutStatus::Failed(RolloutFailure {
            kind,
            message: message.to_owned(),
        }),
        telemetry: RolloutTelemetry::default(),
        elapsed: Duration::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use marbler_policy::rule_based::{AssumeOnTrack, RuleBasedPolicy, SpeedBand};

    use super::*;
    use crate::{
        population::Origin,
        testing::{RIVAL, Script, ScriptedLauncher},
    };

    fn population(size: usize) -> Population {
        let individuals = (0..size)
            .map(|id| {
                let params = MlpSpec::default().init(&mut rand::rng());
                Individual::new(id, params, Origin::Seed)
            })
            .collect();
        Population::new(0, individuals)
    }

    fn coordinator(
        launcher: ScriptedLauncher,
        max_steps: Option<usize>,
    ) -> RolloutCoordinator<ScriptedLauncher> {
        let config = RolloutConfig {
            step_delay_ms: 0,
            max_steps,
            keep_frames: false,
        };
        RolloutCoordinator::new(launcher, config, "bot")
    }

    fn kind(report: &RolloutReport) -> Option<FailureKind> {
        report.failure().map(|f| f.kind)
    }

    #[test]
    fn test_finished_rollout_records_results() {
        let launcher = ScriptedLauncher::new(Script::Finish {
            steps: 3,
            finish_time: 12.0,
        });
        let coordinator = coordinator(launcher, None);
        let policies = ModelPolicyFactory {
            spec: MlpSpec::default(),
        };
        let reports = coordinator.run(&population(2), &policies, &AbortSignal::new());

        assert_eq!(reports.len(), 2);
        for (id, report) in &reports {
            assert_eq!(report.individual, *id);
            assert_eq!(report.player_name, format!("bot-{id}"));
            assert!(report.status.is_finished());
            assert!(report.telemetry.finished);
            assert_eq!(report.telemetry.steps.len(), 4);
            assert!(report.telemetry.steps.last().unwrap().state.finished);
            let names = report
                .telemetry
                .results
                .iter()
                .map(|r| r.name.as_str())
                .collect::<Vec<_>>();
            assert_eq!(names, [report.player_name.as_str(), RIVAL]);
        }
        assert_eq!(coordinator.launcher().spawned(), 2);
        assert_eq!(coordinator.launcher().terminated(), 2);
    }

    #[test]
    fn test_failures_are_reported_and_sessions_released() {
        let launcher = ScriptedLauncher::new(Script::Finish {
            steps: 1,
            finish_time: 5.0,
        })
        .with(1, Script::FailSpawn)
        .with(2, Script::FailConnect)
        .with(3, Script::DropAfter { steps: 2 })
        .with(4, Script::Endless)
        .with(5, Script::Panic);
        let coordinator = coordinator(launcher, Some(10));
        let policies =
            FixedPolicyFactory(RuleBasedPolicy::new(SpeedBand::default(), AssumeOnTrack));
        let reports = coordinator.run(&population(6), &policies, &AbortSignal::new());

        assert_eq!(kind(&reports[&0]), None);
        assert_eq!(kind(&reports[&1]), Some(FailureKind::Spawn));
        assert_eq!(kind(&reports[&2]), Some(FailureKind::Connect));
        assert_eq!(kind(&reports[&3]), Some(FailureKind::Transport));
        assert_eq!(reports[&3].telemetry.steps.len(), 2);
        assert!(!reports[&3].telemetry.finished);
        assert_eq!(kind(&reports[&4]), Some(FailureKind::StepLimit));
        assert_eq!(reports[&4].telemetry.steps.len(), 10);
        assert_eq!(kind(&reports[&5]), Some(FailureKind::Panicked));

        let message = &reports[&2].failure().unwrap().message;
        assert!(message.contains("scripted refusal"), "{message}");

        // every spawned session is released, including the panicking one
        assert_eq!(coordinator.launcher().spawned(), 5);
        assert_eq!(coordinator.launcher().terminated(), 5);
    }

    #[test]
    fn test_raised_abort_stops_rollouts() {
        let coordinator = coordinator(ScriptedLauncher::new(Script::Endless), None);
        let abort = AbortSignal::new();
        abort.raise();
        let policies = ModelPolicyFactory {
            spec: MlpSpec::default(),
        };
        let reports = coordinator.run(&population(3), &policies, &abort);
        assert!(
            reports
                .values()
                .all(|r| kind(r) == Some(FailureKind::Aborted) && r.telemetry.steps.is_empty())
        );
        assert_eq!(coordinator.launcher().terminated(), 3);
    }

    #[test]
    fn test_incompatible_parameters_fail_before_spawn() {
        let coordinator = coordinator(ScriptedLauncher::new(Script::Endless), None);
        let policies = ModelPolicyFactory {
            spec: MlpSpec {
                hidden: 3,
                ..MlpSpec::default()
            },
        };
        let reports = coordinator.run(&population(2), &policies, &AbortSignal::new());
        assert!(reports.values().all(|r| kind(r) == Some(FailureKind::Policy)));
        assert_eq!(coordinator.launcher().spawned(), 0);
    }

    #[test]
    fn test_abort_signal_is_shared() {
        let abort = AbortSignal::new();
        let clone = abort.clone();
        assert!(!abort.is_raised());
        clone.raise();
        assert!(abort.is_raised());
    }
}

use std::path::PathBuf;

use anyhow::Context as _;
use marbler_env::process::ProcessLauncher;
use marbler_policy::{
    rule_based::{AssumeOnTrack, RuleBasedPolicy, SpeedBand},
    tensor::ParameterSet,
};
use marbler_training::{
    checkpoint::{CheckpointStore as _, DirectoryCheckpointStore},
    fitness::FitnessEvaluator,
    population::{Individual, Origin, Population},
    rollout::{
        AbortSignal, FixedPolicyFactory, ModelPolicyFactory, RolloutCoordinator, RolloutReport,
    },
};
use serde::Serialize;

use crate::{
    config::{RunConfig, SimulationArg},
    signal,
    util::Output,
};

#[derive(Default, Debug, Clone, clap::Args)]
pub(crate) struct EvaluateArg {
    /// JSON run configuration; flags take precedence over its values
    #[arg(long)]
    config: Option<PathBuf>,
    /// Race the elite stored for this generation instead of the rule-based policy
    #[arg(long)]
    generation: Option<u32>,
    /// Directory holding one checkpoint per generation
    #[arg(long, default_value = "checkpoints")]
    checkpoint_dir: PathBuf,
    /// Target speed of the rule-based policy in m/s
    #[arg(long, default_value_t = SpeedBand::default().target)]
    target_speed: f32,
    /// Write the recorded telemetry to this JSON file
    #[arg(long)]
    output: Option<PathBuf>,
    #[command(flatten)]
    simulation: SimulationArg,
}

/// Printed to stdout once the race is over.
#[derive(Debug, Serialize)]
struct Evaluation {
    policy: String,
    player_name: String,
    finished: bool,
    failure: Option<String>,
    steps: usize,
    elapsed_secs: f64,
    fitness: f32,
}

pub(crate) fn run(arg: &EvaluateArg) -> anyhow::Result<()> {
    let mut config = RunConfig::load(arg.config.as_deref())?;
    arg.simulation.apply(&mut config.simulation);
    config
        .training
        .validate()
        .context("Invalid training configuration")?;

    let launcher = ProcessLauncher::new(config.simulation);
    let coordinator = RolloutCoordinator::new(
        launcher,
        config.training.rollout.clone(),
        config.training.player_name_prefix.clone(),
    );
    let abort = AbortSignal::new();
    signal::abort_on_shutdown(&abort)?;

    let (policy, report) = match arg.generation {
        Some(generation) => {
            let store = DirectoryCheckpointStore::open(&arg.checkpoint_dir).with_context(|| {
                format!(
                    "Failed to open checkpoint directory: {}",
                    arg.checkpoint_dir.display()
                )
            })?;
            let checkpoint = store
                .load(generation)
                .with_context(|| format!("Failed to load checkpoint of generation {generation}"))?;
            let population = single(checkpoint.parameters, Origin::Resumed);
            let policies = ModelPolicyFactory {
                spec: config.training.model,
            };
            let report = only_report(coordinator.run(&population, &policies, &abort))?;
            (format!("generation-{generation}"), report)
        }
        None => {
            let band = SpeedBand {
                target: arg.target_speed,
                ..SpeedBand::default()
            };
            let policies = FixedPolicyFactory(RuleBasedPolicy::new(band, AssumeOnTrack));
            let population = single(ParameterSet::new(), Origin::Seed);
            let report = only_report(coordinator.run(&population, &policies, &abort))?;
            ("rule-based".to_owned(), report)
        }
    };

    if let Some(path) = &arg.output {
        Output::save_json(&report.telemetry, Some(path.clone()))?;
        let steps = report.telemetry.steps.len();
        tracing::info!(path = %path.display(), steps, "telemetry written");
    }

    let fitness = FitnessEvaluator::new(config.training.fitness)
        .score(&report.telemetry, &report.player_name);
    let evaluation = Evaluation {
        policy,
        finished: report.status.is_finished(),
        failure: report
            .failure()
            .map(|failure| format!("{}: {}", failure.kind, failure.message)),
        steps: report.telemetry.steps.len(),
        elapsed_secs: report.elapsed.as_secs_f64(),
        fitness,
        player_name: report.player_name,
    };
    Output::save_json(&evaluation, None)?;
    Ok(())
}

fn single(parameters: ParameterSet, origin: Origin) -> Population {
    Population::new(0, vec![Individual::new(0, parameters, origin)])
}

fn only_report<I>(reports: I) -> anyhow::Result<RolloutReport>
where
    I: IntoIterator<Item = (usize, RolloutReport)>,
{
    reports
        .into_iter()
        .map(|(_, report)| report)
        .next()
        .context("Rollout produced no report")
}

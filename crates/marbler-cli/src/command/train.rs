use std::path::PathBuf;

use anyhow::Context as _;
use marbler_env::process::ProcessLauncher;
use marbler_training::{
    checkpoint::{CheckpointStore as _, DirectoryCheckpointStore},
    config::{FailurePolicy, TrainingConfig},
    manager::{InitMode, PopulationManager},
    rollout::AbortSignal,
};

use crate::{
    config::{RunConfig, SimulationArg},
    signal,
};

#[derive(Default, Debug, Clone, clap::Args)]
pub(crate) struct TrainArg {
    /// JSON run configuration; flags take precedence over its values
    #[arg(long)]
    config: Option<PathBuf>,
    /// Number of individuals per generation
    #[arg(long)]
    population: Option<usize>,
    /// Number of generations to run
    #[arg(long)]
    generations: Option<u32>,
    /// Index of the first generation of a fresh run
    #[arg(long)]
    generation_start: Option<u32>,
    /// Resume from the checkpoint of this generation
    #[arg(long, conflicts_with = "resume_latest")]
    resume_from: Option<u32>,
    /// Resume from the newest checkpoint, or start fresh if there is none
    #[arg(long)]
    resume_latest: bool,
    /// Directory holding one checkpoint per generation
    #[arg(long, default_value = "checkpoints")]
    checkpoint_dir: PathBuf,
    /// Seed for initialization and mutation
    #[arg(long)]
    seed: Option<u64>,
    /// Cross elite and runner-up at this row before mutating
    #[arg(long)]
    crossover_split_row: Option<usize>,
    /// Keep failed rollouts out of elite selection instead of scoring them 0
    #[arg(long)]
    exclude_failed: bool,
    #[command(flatten)]
    simulation: SimulationArg,
}

impl TrainArg {
    fn apply(&self, config: &mut TrainingConfig) {
        if let Some(population) = self.population {
            config.population_size = population;
        }
        if let Some(generations) = self.generations {
            config.generations = generations;
        }
        if let Some(start) = self.generation_start {
            config.generation_start = start;
        }
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        if let Some(row) = self.crossover_split_row {
            config.crossover_split_row = Some(row);
        }
        if self.exclude_failed {
            config.failure_policy = FailurePolicy::Exclude;
        }
    }

    fn init_mode(&self, store: &DirectoryCheckpointStore) -> anyhow::Result<InitMode> {
        if let Some(generation) = self.resume_from {
            return Ok(InitMode::Resume { generation });
        }
        if !self.resume_latest {
            return Ok(InitMode::Fresh);
        }
        let latest = store
            .latest()
            .with_context(|| format!("Failed to list checkpoints in {}", store.dir().display()))?;
        Ok(match latest {
            Some(generation) => InitMode::Resume { generation },
            None => {
                tracing::info!(dir = %store.dir().display(), "no checkpoint found, starting fresh");
                InitMode::Fresh
            }
        })
    }
}

pub(crate) fn run(arg: &TrainArg) -> anyhow::Result<()> {
    let mut config = RunConfig::load(arg.config.as_deref())?;
    arg.apply(&mut config.training);
    arg.simulation.apply(&mut config.simulation);

    let store = DirectoryCheckpointStore::open(&arg.checkpoint_dir).with_context(|| {
        format!(
            "Failed to open checkpoint directory: {}",
            arg.checkpoint_dir.display()
        )
    })?;
    let mode = arg.init_mode(&store)?;

    let launcher = ProcessLauncher::new(config.simulation);
    let mut manager = PopulationManager::new(config.training, launcher, store)
        .context("Failed to set up training")?;
    let abort = AbortSignal::new();
    signal::abort_on_shutdown(&abort)?;
    let summary = manager.train(mode, &abort).context("Training failed")?;

    if let Some(best) = &summary.best {
        tracing::info!(
            generation = best.generation,
            fitness = best.elite_fitness,
            "best elite of the run"
        );
    }
    tracing::info!(
        generations = summary.generations_completed,
        next_generation = summary.population.generation(),
        aborted = summary.aborted,
        checkpoints = %manager.store().dir().display(),
        "done"
    );
    Ok(())
}

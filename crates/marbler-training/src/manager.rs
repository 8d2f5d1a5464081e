//! Generation lifecycle.
//!
//! [`PopulationManager`] drives the selection loop:
//!
//! 1. **Initialize** - fresh random individuals, or a resumed checkpoint plus
//!    mutated clones of it
//! 2. **Roll out** - every individual races once, concurrently
//! 3. **Score** - each finished rollout is scored from its race results
//! 4. **Advance** - the best individual is copied unchanged into slot 0 of the
//!    next generation; every other slot receives a mutation of it
//! 5. **Checkpoint** - the elite is stored under the completed generation's index
//!
//! Steps 2-5 form a barrier: a generation is only advanced and checkpointed
//! after every rollout has ended.

use std::collections::BTreeMap;

use marbler_env::EnvironmentLauncher;
use marbler_policy::ModelError;
use rand::SeedableRng as _;
use rand_pcg::Pcg32;

use crate::{
    checkpoint::{Checkpoint, CheckpointError, CheckpointStore},
    config::{ConfigError, FailurePolicy, TrainingConfig},
    fitness::FitnessEvaluator,
    operators::{Mutation, RowSplitCrossover},
    population::{Individual, Origin, Population, Scores},
    rollout::{AbortSignal, ModelPolicyFactory, RolloutCoordinator, RolloutReport},
};

/// Where the first population comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitMode {
    Fresh,
    Resume { generation: u32 },
}

#[derive(Debug, derive_more::Display, derive_more::Error, derive_more::IsVariant)]
pub enum TrainingError {
    #[display("invalid training configuration")]
    Config { source: ConfigError },
    #[display("no checkpoint stored for generation {generation}")]
    CheckpointNotFound {
        generation: u32,
        source: CheckpointError,
    },
    #[display("checkpoint store failure")]
    Checkpoint { source: CheckpointError },
    #[display("checkpoint of generation {generation} does not fit the model")]
    IncompatibleCheckpoint { generation: u32, source: ModelError },
    #[display("generation {generation} was aborted")]
    Aborted { generation: u32 },
}

/// Fitness statistics of one completed generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSummary {
    pub generation: u32,
    /// Rollouts that reached a terminal state.
    pub finished: usize,
    pub failed: usize,
    pub min_fitness: f32,
    pub mean_fitness: f32,
    pub max_fitness: f32,
    /// Id of the individual carried into the next generation.
    pub elite: usize,
    pub elite_fitness: f32,
}

impl GenerationSummary {
    fn new(
        population: &Population,
        reports: &BTreeMap<usize, RolloutReport>,
        scores: &Scores,
    ) -> Self {
        let finished = reports.values().filter(|r| r.status.is_finished()).count();
        let (elite, elite_fitness) = population
            .elite(scores)
            .map_or((0, 0.0), |(ind, score)| (ind.id(), score));

        let values = scores.values().copied().filter(|v| !v.is_nan());
        let (min, max, sum, count) = values.fold(
            (f32::INFINITY, f32::NEG_INFINITY, 0.0, 0_usize),
            |(min, max, sum, count), v| (min.min(v), max.max(v), sum + v, count + 1),
        );
        let (min_fitness, mean_fitness, max_fitness) = if count == 0 {
            (0.0, 0.0, 0.0)
        } else {
            #[expect(clippy::cast_precision_loss)]
            let mean = sum / count as f32;
            (min, mean, max)
        };

        Self {
            generation: population.generation(),
            finished,
            failed: population.len() - finished,
            min_fitness,
            mean_fitness,
            max_fitness,
            elite,
            elite_fitness,
        }
    }
}

/// Everything one generation produced.
#[derive(Debug)]
pub struct GenerationOutcome {
    pub summary: GenerationSummary,
    pub reports: BTreeMap<usize, RolloutReport>,
    pub scores: Scores,
    /// The population of the following generation.
    pub next: Population,
}

#[derive(Debug)]
pub struct TrainingSummary {
    pub generations_completed: u32,
    /// Summary of the generation with the highest elite fitness.
    pub best: Option<GenerationSummary>,
    /// The population that would have been evaluated next.
    pub population: Population,
    pub aborted: bool,
}

#[derive(Debug)]
pub struct PopulationManager<L, S> {
    config: TrainingConfig,
    mutation: Mutation,
    crossover: Option<RowSplitCrossover>,
    fitness: FitnessEvaluator,
    policies: ModelPolicyFactory,
    coordinator: RolloutCoordinator<L>,
    store: S,
    rng: Pcg32,
}

impl<L, S> PopulationManager<L, S>
where
    L: EnvironmentLauncher,
    S: CheckpointStore,
{
    pub fn new(config: TrainingConfig, launcher: L, store: S) -> Result<Self, TrainingError> {
        config
            .validate()
            .map_err(|source| TrainingError::Config { source })?;
        let mutation = config
            .mutation()
            .map_err(|source| TrainingError::Config { source })?;
        let rng = match config.seed {
            Some(seed) => Pcg32::seed_from_u64(seed),
            None => Pcg32::from_rng(&mut rand::rng()),
        };
        let coordinator = RolloutCoordinator::new(
            launcher,
            config.rollout.clone(),
            config.player_name_prefix.clone(),
        );
        Ok(Self {
            mutation,
            crossover: config
                .crossover_split_row
                .map(|split_row| RowSplitCrossover { split_row }),
            fitness: FitnessEvaluator::new(config.fitness),
            policies: ModelPolicyFactory { spec: config.model },
            coordinator,
            store,
            rng,
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    #[must_use]
    pub fn launcher(&self) -> &L {
        self.coordinator.launcher()
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Builds the first population.
    ///
    /// Resuming loads the checkpoint of `generation` and continues with
    /// generation `generation + 1`: individual 0 is the stored elite unchanged,
    /// the others are mutations of it. Nothing is launched if the checkpoint is
    /// missing or does not fit the model.
    pub fn initialize(&mut self, mode: InitMode) -> Result<Population, TrainingError> {
        let size = self.config.population_size;
        let population = match mode {
            InitMode::Fresh => {
                let population = Population::seeded(
                    self.config.generation_start,
                    size,
                    &self.config.model,
                    &mut self.rng,
                );
                tracing::info!(
                    generation = population.generation(),
                    individuals = size,
                    "initialized fresh population"
                );
                population
            }
            InitMode::Resume { generation } => {
                let checkpoint = self.store.load(generation).map_err(|source| {
                    if source.is_not_found() {
                        TrainingError::CheckpointNotFound { generation, source }
                    } else {
                        TrainingError::Checkpoint { source }
                    }
                })?;
                self.config
                    .model
                    .validate(&checkpoint.parameters)
                    .map_err(|source| TrainingError::IncompatibleCheckpoint {
                        generation,
                        source,
                    })?;

                let mut individuals = Vec::with_capacity(size);
                for id in 1..size {
                    let child = self.mutation.mutate(&checkpoint.parameters, &mut self.rng);
                    individuals.push(Individual::new(id, child, Origin::Mutated));
                }
                individuals.insert(0, Individual::new(0, checkpoint.parameters, Origin::Resumed));

                tracing::info!(
                    from = generation,
                    fitness = checkpoint.fitness,
                    saved_at = %checkpoint.saved_at,
                    "resumed from checkpoint"
                );
                Population::new(generation.saturating_add(1), individuals)
            }
        };
        Ok(population)
    }

    /// Fitness of every individual eligible for elite selection.
    #[must_use]
    pub fn score(
        &self,
        population: &Population,
        reports: &BTreeMap<usize, RolloutReport>,
    ) -> Scores {
        population
            .individuals()
            .iter()
            .filter_map(|ind| {
                let score = match reports.get(&ind.id()) {
                    Some(report) if report.status.is_finished() => {
                        self.fitness.score(&report.telemetry, &report.player_name)
                    }
                    _ => match self.config.failure_policy {
                        FailurePolicy::ScoreZero => 0.0,
                        FailurePolicy::Exclude => return None,
                    },
                };
                Some((ind.id(), score))
            })
            .collect()
    }

    /// Produces the next generation from a scored one.
    ///
    /// Index 0 is the elite, copied unchanged. Indices `1..N` are independent
    /// mutations of the elite, or of its crossover with the runner-up when
    /// crossover is enabled. If nobody is eligible, individual 0 is carried.
    pub fn advance(&mut self, population: &Population, scores: &Scores) -> Population {
        let next_generation = population.generation().saturating_add(1);
        let Some(first) = population.individuals().first() else {
            return Population::new(next_generation, vec![]);
        };
        let ranked = population.ranked(scores);
        let elite = ranked.first().map_or(first, |(ind, _)| *ind);
        let runner_up = ranked.get(1).map(|(ind, _)| *ind);
        tracing::debug!(
            elite = elite.id(),
            runner_up = ?runner_up.map(Individual::id),
            "selected parents"
        );

        let crossed = self.crossover.zip(runner_up).and_then(|(crossover, runner_up)| {
            crossover
                .cross(elite.parameters(), runner_up.parameters())
                .inspect_err(|e| tracing::warn!(error = %e, "crossover skipped"))
                .ok()
        });
        let (base, origin) = match &crossed {
            Some(params) => (params, Origin::Crossover),
            None => (elite.parameters(), Origin::Mutated),
        };

        let mut individuals = Vec::with_capacity(population.len());
        individuals.push(Individual::new(0, elite.parameters().clone(), Origin::Elite));
        for id in 1..population.len() {
            let child = self.mutation.mutate(base, &mut self.rng);
            individuals.push(Individual::new(id, child, origin));
        }
        Population::new(next_generation, individuals)
    }

    /// Runs one full generation: rollouts, scoring, advance and checkpoint.
    ///
    /// If `abort` is raised while rollouts are running, the generation is
    /// discarded and [`TrainingError::Aborted`] is returned.
    pub fn run_generation(
        &mut self,
        population: &Population,
        abort: &AbortSignal,
    ) -> Result<GenerationOutcome, TrainingError> {
        let generation = population.generation();
        let span = tracing::info_span!("generation", generation);
        let _enter = span.enter();

        tracing::info!(individuals = population.len(), "starting rollouts");
        let reports = self.coordinator.run(population, &self.policies, abort);
        if abort.is_raised() {
            tracing::warn!("abort requested, discarding generation results");
            return Err(TrainingError::Aborted { generation });
        }

        let scores = self.score(population, &reports);
        let summary = GenerationSummary::new(population, &reports, &scores);
        tracing::info!(
            finished = summary.finished,
            failed = summary.failed,
            min = summary.min_fitness,
            mean = summary.mean_fitness,
            max = summary.max_fitness,
            elite = summary.elite,
            "generation scored"
        );

        let next = self.advance(population, &scores);
        if let Some(elite) = next.individuals().first() {
            let checkpoint = Checkpoint::new(
                generation,
                summary.elite_fitness,
                elite.parameters().clone(),
            );
            self.store
                .save(&checkpoint)
                .map_err(|source| TrainingError::Checkpoint { source })?;
        }

        Ok(GenerationOutcome {
            summary,
            reports,
            scores,
            next,
        })
    }

    /// Runs the configured number of generations.
    ///
    /// Stops early, without error, once `abort` is raised.
    pub fn train(
        &mut self,
        mode: InitMode,
        abort: &AbortSignal,
    ) -> Result<TrainingSummary, TrainingError> {
        let mut population = self.initialize(mode)?;
        let mut generations_completed = 0;
        let mut best: Option<GenerationSummary> = None;
        let mut aborted = false;

        for _ in 0..self.config.generations {
            if abort.is_raised() {
                aborted = true;
                break;
            }
            let outcome = match self.run_generation(&population, abort) {
                Ok(outcome) => outcome,
                Err(TrainingError::Aborted { .. }) => {
                    aborted = true;
                    break;
                }
                Err(e) => return Err(e),
            };
            generations_completed += 1;
            if best
                .as_ref()
                .is_none_or(|b| outcome.summary.elite_fitness > b.elite_fitness)
            {
                best = Some(outcome.summary);
            }
            population = outcome.next;
        }

        if aborted {
            tracing::info!(generations_completed, "training aborted");
        } else {
            tracing::info!(generations_completed, "training finished");
        }
        Ok(TrainingSummary {
            generations_completed,
            best,
            population,
            aborted,
        })
    }
}

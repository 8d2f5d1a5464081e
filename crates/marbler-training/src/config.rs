//! Training run configuration.

use marbler_env::Action;
use marbler_policy::{features::FEATURE_COUNT, model::MlpSpec};
use serde::{Deserialize, Serialize};

use crate::{
    fitness::FitnessWeights,
    operators::{Mutation, OperatorError},
    rollout::RolloutConfig,
};

/// How failed rollouts take part in elite selection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Failed rollouts score `0` and compete like any other.
    #[default]
    ScoreZero,
    /// Failed rollouts are not eligible as elite. If every rollout failed, the
    /// current individual 0 is carried over.
    Exclude,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub population_size: usize,
    /// Number of generations to run.
    pub generations: u32,
    /// Index of the first generation of a fresh run.
    pub generation_start: u32,
    pub mutation_rate: f64,
    pub mutation_sigma: f32,
    /// Enables row-split crossover between elite and runner-up.
    pub crossover_split_row: Option<usize>,
    pub failure_policy: FailurePolicy,
    /// Individual `i` races as `"{prefix}-{i}"`.
    pub player_name_prefix: String,
    /// Seed for initialization and mutation. Random when absent.
    pub seed: Option<u64>,
    pub fitness: FitnessWeights,
    pub model: MlpSpec,
    pub rollout: RolloutConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            population_size: 8,
            generations: 50,
            generation_start: 0,
            mutation_rate: Mutation::DEFAULT_RATE,
            mutation_sigma: Mutation::DEFAULT_SIGMA,
            crossover_split_row: None,
            failure_policy: FailurePolicy::default(),
            player_name_prefix: "bot".to_owned(),
            seed: None,
            fitness: FitnessWeights::default(),
            model: MlpSpec::default(),
            rollout: RolloutConfig::default(),
        }
    }
}

#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum ConfigError {
    #[display("population size must be at least 1")]
    EmptyPopulation,
    #[display("invalid mutation parameters")]
    Mutation { source: OperatorError },
    #[display("player name prefix must not be empty")]
    EmptyPlayerName,
    #[display(
        "model {input}->{hidden}->{output} does not fit {} features and {} action flags",
        FEATURE_COUNT,
        Action::DIMENSIONS
    )]
    Model {
        input: usize,
        hidden: usize,
        output: usize,
    },
    #[display("fitness weight {name} must be finite and non-negative")]
    FitnessWeight { name: &'static str },
    #[display("fitness weights sum to {sum}, more than 1")]
    FitnessWeightSum { sum: f32 },
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.population_size == 0 {
            return Err(ConfigError::EmptyPopulation);
        }
        self.mutation()?;
        if self.player_name_prefix.is_empty() {
            return Err(ConfigError::EmptyPlayerName);
        }
        let MlpSpec {
            input,
            hidden,
            output,
        } = self.model;
        if input != FEATURE_COUNT || output != Action::DIMENSIONS || hidden == 0 {
            return Err(ConfigError::Model {
                input,
                hidden,
                output,
            });
        }
        let weights = [
            ("finish_time", self.fitness.finish_time),
            ("checkpoint_id", self.fitness.checkpoint_id),
            ("checkpoint_time", self.fitness.checkpoint_time),
        ];
        if let Some((name, _)) = weights.into_iter().find(|(_, w)| !w.is_finite() || *w < 0.0) {
            return Err(ConfigError::FitnessWeight { name });
        }
        let sum = self.fitness.sum();
        if sum > 1.0 + f32::EPSILON {
            return Err(ConfigError::FitnessWeightSum { sum });
        }
        Ok(())
    }

    /// Builds the mutation operator described by this configuration.
    pub fn mutation(&self) -> Result<Mutation, ConfigError> {
        Mutation::new(self.mutation_rate, self.mutation_sigma)
            .map_err(|source| ConfigError::Mutation { source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        TrainingConfig::default().validate().unwrap();
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = TrainingConfig {
            population_size: 0,
            ..TrainingConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::EmptyPopulation)));

        let config = TrainingConfig {
            mutation_rate: 2.0,
            ..TrainingConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Mutation { .. })));

        let config = TrainingConfig {
            player_name_prefix: String::new(),
            ..TrainingConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::EmptyPlayerName)));

        let config = TrainingConfig {
            model: MlpSpec {
                output: 3,
                ..MlpSpec::default()
            },
            ..TrainingConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Model { .. })));

        let mut config = TrainingConfig::default();
        config.fitness.checkpoint_time = -1.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::FitnessWeight {
                name: "checkpoint_time"
            })
        ));

        let mut config = TrainingConfig::default();
        config.fitness.finish_time = 0.8;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::FitnessWeightSum { .. })
        ));
    }

    #[test]
    fn test_fitness_weights_may_sum_below_one() {
        let mut config = TrainingConfig::default();
        config.fitness.checkpoint_time = 0.0;
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: TrainingConfig = serde_json::from_str(
            r#"{ "population_size": 4, "failure_policy": "exclude",
                 "rollout": { "max_steps": 100 } }"#,
        )
        .unwrap();
        assert_eq!(config.population_size, 4);
        assert_eq!(config.failure_policy, FailurePolicy::Exclude);
        assert_eq!(config.rollout.max_steps, Some(100));
        assert_eq!(config.rollout.step_delay_ms, 200);
        assert_eq!(config.generations, 50);
        assert_eq!(config.player_name_prefix, "bot");
    }
}

//! Fitness scoring from race results.
//!
//! A rollout is scored only once it has ended. The agent's own result entry is
//! compared against the best value of the same field across every competitor
//! in the race:
//!
//! ```text
//! fitness = 0.5 × finish_time / max(finish_time)
//!         + 0.3 × last_touched_checkpoint_id / max(last_touched_checkpoint_id)
//!         + 0.2 × last_touched_checkpoint_time / max(last_touched_checkpoint_time)
//! ```
//!
//! The finish term dominates; checkpoint progress and timing break ties between
//! marbles that did not finish. A term whose maximum is zero (or absent) is
//! left out instead of failing, and a missing own value counts as zero. The
//! result always lies in `[0, 1]`.
//!
//! Rollouts that failed, never reached the finish state, or whose results do not
//! name the agent score `0`. The two cases are logged differently: an
//! incomplete rollout is already reported by the coordinator, while terminal
//! telemetry without the agent's entry points at a protocol problem.

use marbler_env::ResultEntry;
use serde::{Deserialize, Serialize};

use crate::rollout::RolloutTelemetry;

/// Relative weights of the three fitness terms. They must not sum above 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitnessWeights {
    pub finish_time: f32,
    pub checkpoint_id: f32,
    pub checkpoint_time: f32,
}

impl FitnessWeights {
    #[must_use]
    pub fn sum(&self) -> f32 {
        self.finish_time + self.checkpoint_id + self.checkpoint_time
    }
}

impl Default for FitnessWeights {
    fn default() -> Self {
        Self {
            finish_time: 0.5,
            checkpoint_id: 0.3,
            checkpoint_time: 0.2,
        }
    }
}

/// Why a rollout could not be scored.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
pub enum Unscored {
    #[display("no telemetry recorded")]
    Empty,
    #[display("rollout did not reach a terminal state")]
    NotTerminal,
    #[display("terminal telemetry carries no results")]
    NoResults,
    #[display("no result entry for '{name}'")]
    MissingCompetitor { name: String },
}

impl Unscored {
    /// True when the rollout finished but its results are unusable.
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::NoResults | Self::MissingCompetitor { .. })
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FitnessEvaluator {
    weights: FitnessWeights,
}

impl FitnessEvaluator {
    #[must_use]
    pub fn new(weights: FitnessWeights) -> Self {
        Self { weights }
    }

    #[must_use]
    pub fn weights(&self) -> &FitnessWeights {
        &self.weights
    }

    /// Scores the telemetry of the competitor named `own_name`.
    pub fn evaluate(&self, telemetry: &RolloutTelemetry, own_name: &str) -> Result<f32, Unscored> {
        if telemetry.steps.is_empty() && !telemetry.finished {
            return Err(Unscored::Empty);
        }
        if !telemetry.finished {
            return Err(Unscored::NotTerminal);
        }
        let results = &telemetry.results;
        if results.is_empty() {
            return Err(Unscored::NoResults);
        }
        let own = results
            .iter()
            .find(|r| r.name == own_name)
            .ok_or_else(|| Unscored::MissingCompetitor {
                name: own_name.to_owned(),
            })?;

        #[expect(clippy::cast_precision_loss)]
        let checkpoint_id = |r: &ResultEntry| r.last_touched_checkpoint_id.map(|id| id as f32);
        let terms = [
            (self.weights.finish_time, field_ratio(results, own, |r| r.finish_time)),
            (self.weights.checkpoint_id, field_ratio(results, own, checkpoint_id)),
            (
                self.weights.checkpoint_time,
                field_ratio(results, own, |r| r.last_touched_checkpoint_time),
            ),
        ];
        // `Sum` for floats starts at -0.0, which ranks below the 0.0 of failed rollouts.
        let score = terms
            .iter()
            .filter_map(|(weight, ratio)| ratio.map(|r| weight * r))
            .fold(0.0_f32, |acc, term| acc + term);
        Ok(score.clamp(0.0, 1.0))
    }

    /// Like [`Self::evaluate`], but logs the reason and returns `0` for unscorable rollouts.
    #[must_use]
    pub fn score(&self, telemetry: &RolloutTelemetry, own_name: &str) -> f32 {
        match self.evaluate(telemetry, own_name) {
            Ok(score) => score,
            Err(reason) if reason.is_malformed() => {
                tracing::warn!(competitor = own_name, %reason, "malformed telemetry, scoring 0");
                0.0
            }
            Err(reason) => {
                tracing::debug!(competitor = own_name, %reason, "unscored rollout, scoring 0");
                0.0
            }
        }
    }
}

/// `own / max` for one result field, or `None` when the maximum is not positive.
fn field_ratio<F>(results: &[ResultEntry], own: &ResultEntry, field: F) -> Option<f32>
where
    F: Fn(&ResultEntry) -> Option<f32>,
{
    let max = results
        .iter()
        .filter_map(&field)
        .filter(|v| v.is_finite())
        .reduce(f32::max)?;
    if max <= 0.0 {
        return None;
    }
    let own = field(own).filter(|v| v.is_finite()).unwrap_or(0.0);
    Some(own / max)
}

#[cfg(test)]
mod tests {
    use marbler_env::{Action, StateSnapshot};
    use marbler_policy::model::MlpSpec;
    use rand::SeedableRng as _;
    use rand_pcg::Pcg32;

    use super::*;
    use crate::{
        population::{Population, Scores},
        rollout::Step,
    };

    fn entry(name: &str, finish: f32, cp_id: u64, cp_time: f32) -> ResultEntry {
        ResultEntry {
            name: name.to_owned(),
            finish_time: Some(finish),
            last_touched_checkpoint_id: Some(cp_id),
            last_touched_checkpoint_time: Some(cp_time),
        }
    }

    fn finished(results: Vec<ResultEntry>) -> RolloutTelemetry {
        RolloutTelemetry {
            steps: vec![Step {
                state: StateSnapshot::default(),
                action: Action::IDLE,
            }],
            finished: true,
            results,
        }
    }

    #[test]
    fn test_two_competitor_race() {
        let telemetry = finished(vec![entry("A", 10.0, 5, 9.0), entry("B", 20.0, 5, 9.0)]);
        let score = FitnessEvaluator::default().evaluate(&telemetry, "A").unwrap();
        assert!((score - 0.75).abs() < 1e-6, "score = {score}");

        let score = FitnessEvaluator::default().evaluate(&telemetry, "B").unwrap();
        assert!((score - 1.0).abs() < 1e-6, "score = {score}");
    }

    #[test]
    fn test_unscorable_telemetry_is_zero() {
        let evaluator = FitnessEvaluator::default();

        let empty = RolloutTelemetry::default();
        assert_eq!(evaluator.evaluate(&empty, "A"), Err(Unscored::Empty));
        assert_eq!(evaluator.score(&empty, "A"), 0.0);

        let mut running = finished(vec![entry("A", 1.0, 1, 1.0)]);
        running.finished = false;
        assert_eq!(evaluator.evaluate(&running, "A"), Err(Unscored::NotTerminal));
        assert_eq!(evaluator.score(&running, "A"), 0.0);

        let resultless = finished(vec![]);
        assert_eq!(evaluator.evaluate(&resultless, "A"), Err(Unscored::NoResults));
        assert_eq!(evaluator.score(&resultless, "A"), 0.0);

        let other = finished(vec![entry("B", 1.0, 1, 1.0)]);
        assert!(matches!(
            evaluator.evaluate(&other, "A"),
            Err(Unscored::MissingCompetitor { .. })
        ));
        assert_eq!(evaluator.score(&other, "A"), 0.0);
    }

    #[test]
    fn test_zero_denominators_are_omitted() {
        // nobody finished and nobody touched a checkpoint: only the id term remains
        let telemetry = finished(vec![
            ResultEntry {
                name: "A".to_owned(),
                finish_time: None,
                last_touched_checkpoint_id: Some(2),
                last_touched_checkpoint_time: Some(0.0),
            },
            ResultEntry {
                name: "B".to_owned(),
                finish_time: None,
                last_touched_checkpoint_id: Some(4),
                last_touched_checkpoint_time: Some(0.0),
            },
        ]);
        let score = FitnessEvaluator::default().evaluate(&telemetry, "A").unwrap();
        assert!((score - 0.15).abs() < 1e-6, "score = {score}");
    }

    #[test]
    fn test_all_zero_results_score_zero() {
        let telemetry = finished(vec![entry("A", 0.0, 0, 0.0), entry("B", 0.0, 0, 0.0)]);
        assert_eq!(FitnessEvaluator::default().evaluate(&telemetry, "A"), Ok(0.0));
    }

    #[test]
    fn test_race_without_progress_scores_positive_zero() {
        let telemetry = finished(vec![
            ResultEntry {
                name: "bot-0".to_owned(),
                ..ResultEntry::default()
            },
            ResultEntry {
                name: "rival".to_owned(),
                ..ResultEntry::default()
            },
        ]);
        let score = FitnessEvaluator::default().evaluate(&telemetry, "bot-0").unwrap();
        assert_eq!(score.to_bits(), 0.0_f32.to_bits(), "score = {score:?}");

        // a finished zero keeps its tie with a failed sibling, lowest id wins
        let mut rng = Pcg32::seed_from_u64(3);
        let population = Population::seeded(0, 2, &MlpSpec::default(), &mut rng);
        let scores = Scores::from([(0, score), (1, 0.0)]);
        let (elite, _) = population.elite(&scores).unwrap();
        assert_eq!(elite.id(), 0);
    }

    #[test]
    fn test_all_equal_results_score_one() {
        let telemetry = finished(vec![entry("A", 7.0, 3, 6.0), entry("B", 7.0, 3, 6.0)]);
        let score = FitnessEvaluator::default().evaluate(&telemetry, "A").unwrap();
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_score_stays_in_unit_interval() {
        let evaluator = FitnessEvaluator::default();
        let names = ["A", "B", "C"];
        for finish in [0.5, 3.0, 40.0] {
            for cp in [0, 1, 9] {
                let telemetry = finished(vec![
                    entry("A", finish, cp, finish / 2.0),
                    entry("B", 12.0, 4, 6.0),
                    ResultEntry {
                        name: "C".to_owned(),
                        ..ResultEntry::default()
                    },
                ]);
                for name in names {
                    let score = evaluator.evaluate(&telemetry, name).unwrap();
                    assert!((0.0..=1.0).contains(&score), "{name}: {score}");
                }
            }
        }
    }
}

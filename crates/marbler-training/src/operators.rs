//! Variation operators over parameter sets.
//!
//! - [`Mutation`] - per-tensor Gaussian mutation, the only operator the
//!   default selection loop uses
//! - [`RowSplitCrossover`] - two-parent crossover that cuts every tensor at a
//!   fixed row, available behind `TrainingConfig::crossover_split_row`
//!
//! # Mutation
//!
//! Each named tensor gets one Bernoulli trial with probability `rate`. When it
//! succeeds, independent `N(0, sigma²)` noise is added to every element of that
//! tensor; otherwise the tensor is copied untouched. A tensor therefore changes
//! as a whole or not at all.
//!
//! With `rate = 0` mutation is the identity, with `rate = 1` every tensor is
//! perturbed. There is no adaptive schedule: the rate and sigma stay fixed for
//! the whole run.

use marbler_policy::tensor::{ParameterSet, Tensor};
use rand::Rng;
use rand_distr::Normal;

#[derive(Debug, Clone, PartialEq, derive_more::Display, derive_more::Error)]
pub enum OperatorError {
    #[display("mutation rate {rate} is outside [0, 1]")]
    InvalidRate { rate: f64 },
    #[display("mutation sigma {sigma} must be finite and non-negative")]
    InvalidSigma { sigma: f32 },
    #[display("parents do not share the same tensor layout")]
    LayoutMismatch,
}

/// Per-tensor Gaussian mutation.
#[derive(Debug, Clone, Copy)]
pub struct Mutation {
    rate: f64,
    noise: Normal<f32>,
}

impl Mutation {
    pub const DEFAULT_RATE: f64 = 0.1;
    pub const DEFAULT_SIGMA: f32 = 0.1;

    /// Creates a mutation operator.
    ///
    /// # Arguments
    ///
    /// * `rate` - Probability that a tensor is perturbed, in `[0, 1]`
    /// * `sigma` - Standard deviation of the per-element noise
    pub fn new(rate: f64, sigma: f32) -> Result<Self, OperatorError> {
        if !(0.0..=1.0).contains(&rate) {
            return Err(OperatorError::InvalidRate { rate });
        }
        if !sigma.is_finite() || sigma < 0.0 {
            return Err(OperatorError::InvalidSigma { sigma });
        }
        let noise = Normal::new(0.0, sigma).map_err(|_| OperatorError::InvalidSigma { sigma })?;
        Ok(Self { rate, noise })
    }

    #[must_use]
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Returns a mutated copy of `params`. The input is never modified.
    pub fn mutate<R>(&self, params: &ParameterSet, rng: &mut R) -> ParameterSet
    where
        R: Rng + ?Sized,
    {
        let mut child = params.clone();
        for (_, tensor) in child.iter_mut() {
            if rng.random_bool(self.rate) {
                for v in tensor.values_mut() {
                    *v += rng.sample(self.noise);
                }
            }
        }
        child
    }
}

/// Two-parent crossover splitting each tensor at a fixed row.
///
/// Rows `0..split_row` come from the first parent and the remaining rows from
/// the second. Vectors are split the same way, element by element. A split
/// past the last row copies the first parent entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowSplitCrossover {
    pub split_row: usize,
}

impl RowSplitCrossover {
    pub fn cross(&self, a: &ParameterSet, b: &ParameterSet) -> Result<ParameterSet, OperatorError> {
        if !a.same_layout(b) {
            return Err(OperatorError::LayoutMismatch);
        }
        let child = a
            .iter()
            .zip(b.iter())
            .map(|((name, ta), (_, tb))| {
                let shape = ta.shape();
                let cut = self.split_row.min(shape.rows()) * shape.row_len();
                let tensor = Tensor::from_fn(shape.clone(), |i| {
                    if i < cut { ta.values()[i] } else { tb.values()[i] }
                });
                (name.clone(), tensor)
            })
            .collect();
        Ok(child)
    }
}

//! Control policies for the marble race agent.
//!
//! A [`Policy`] maps an observed [`StateSnapshot`] to an [`Action`]. Two kinds
//! are provided:
//!
//! - [`rule_based::RuleBasedPolicy`] - keeps speed inside a target band and resets
//!   the marble when perception reports it has left the track
//! - [`model_policy::ModelPolicy`] - a small perceptron over velocity features,
//!   whose parameters are what training evolves
//!
//! Model parameters are held in a strongly typed [`tensor::ParameterSet`]
//! whose shapes are validated against an [`model::MlpSpec`] whenever a model is
//! built from them.

use std::fmt;

use marbler_env::{Action, StateSnapshot};

use self::tensor::Shape;

pub mod features;
pub mod model;
pub mod model_policy;
pub mod rule_based;
pub mod tensor;

#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum ModelError {
    #[display("tensor '{name}' is missing")]
    MissingTensor { name: String },
    #[display("unexpected tensor '{name}'")]
    UnexpectedTensor { name: String },
    #[display("tensor '{name}' has shape {actual}, expected {expected}")]
    ShapeMismatch {
        name: String,
        expected: Shape,
        actual: Shape,
    },
    #[display("{len} values do not fill shape {shape}")]
    ValueCount { shape: Shape, len: usize },
    #[display("model maps {input} inputs to {output} outputs, which does not fit the policy")]
    Incompatible { input: usize, output: usize },
}

/// Chooses an action for each observed state.
///
/// Implementations must be pure: the same state always yields the same action.
pub trait Policy: fmt::Debug + Send + Sync {
    fn decide(&self, state: &StateSnapshot) -> Action;
}

impl<P> Policy for Box<P>
where
    P: Policy + ?Sized,
{
    fn decide(&self, state: &StateSnapshot) -> Action {
        (**self).decide(state)
    }
}

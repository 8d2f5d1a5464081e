use marbler_env::{Action, StateSnapshot};

use crate::{
    ModelError, Policy, features,
    model::{Mlp, MlpSpec},
    tensor::ParameterSet,
};

/// Output activation above which an action flag is set.
pub const DECISION_THRESHOLD: f32 = 0.5;

/// Policy driven by a perceptron over the motion features.
///
/// Each output unit independently decides one action flag, in
/// `forward, back, left, right, reset` order.
#[derive(Debug, Clone)]
pub struct ModelPolicy {
    mlp: Mlp,
}

impl ModelPolicy {
    pub fn new(spec: MlpSpec, params: &ParameterSet) -> Result<Self, ModelError> {
        if spec.input != features::FEATURE_COUNT || spec.output != Action::DIMENSIONS {
            return Err(ModelError::Incompatible {
                input: spec.input,
                output: spec.output,
            });
        }
        Ok(Self {
            mlp: Mlp::new(spec, params)?,
        })
    }
}

impl Policy for ModelPolicy {
    fn decide(&self, state: &StateSnapshot) -> Action {
        let outputs = self.mlp.forward(&features::extract(state));
        let mut flags = [false; Action::DIMENSIONS];
        for (flag, out) in flags.iter_mut().zip(outputs) {
            *flag = out > DECISION_THRESHOLD;
        }
        Action::from_flags(flags)
    }
}

//! Two-layer perceptron used by model-driven policies.
//!
//! ```text
//! input (features) -> fc1 -> ReLU -> fc2 -> sigmoid -> output (one unit per action flag)
//! ```
//!
//! Weights are stored as `[out, in]` row-major matrices, biases as `[out]`
//! vectors, under the names `fc1.weight`, `fc1.bias`, `fc2.weight` and
//! `fc2.bias`.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    ModelError,
    tensor::{ParameterSet, Shape, Tensor},
};

/// Layer widths of the perceptron.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MlpSpec {
    pub input: usize,
    pub hidden: usize,
    pub output: usize,
}

impl Default for MlpSpec {
    fn default() -> Self {
        Self {
            input: crate::features::FEATURE_COUNT,
            hidden: 10,
            output: marbler_env::Action::DIMENSIONS,
        }
    }
}

impl MlpSpec {
    /// Names and shapes of every tensor the model expects.
    #[must_use]
    pub fn parameter_shapes(&self) -> Vec<(&'static str, Shape)> {
        vec![
            ("fc1.weight", Shape::new([self.hidden, self.input])),
            ("fc1.bias", Shape::new([self.hidden])),
            ("fc2.weight", Shape::new([self.output, self.hidden])),
            ("fc2.bias", Shape::new([self.output])),
        ]
    }

    /// Draws fresh parameters.
    ///
    /// Each layer's weights and bias are uniform in `[-1/sqrt(fan_in), 1/sqrt(fan_in)]`.
    pub fn init<R>(&self, rng: &mut R) -> ParameterSet
    where
        R: Rng + ?Sized,
    {
        self.parameter_shapes()
            .into_iter()
            .map(|(name, shape)| {
                let fan_in = if name.starts_with("fc1") {
                    self.input
                } else {
                    self.hidden
                };
                #[expect(clippy::cast_precision_loss)]
                let bound = 1.0 / (fan_in.max(1) as f32).sqrt();
                let tensor = Tensor::from_fn(shape, |_| rng.random_range(-bound..=bound));
                (name.to_owned(), tensor)
            })
            .collect()
    }

    /// Checks that `params` holds exactly the tensors this model expects.
    pub fn validate(&self, params: &ParameterSet) -> Result<(), ModelError> {
        let expected = self.parameter_shapes();
        for (name, shape) in &expected {
            let tensor = params.get(name).ok_or_else(|| ModelError::MissingTensor {
                name: (*name).to_owned(),
            })?;
            if tensor.shape() != shape {
                return Err(ModelError::ShapeMismatch {
                    name: (*name).to_owned(),
                    expected: shape.clone(),
                    actual: tensor.shape().clone(),
                });
            }
        }
        if let Some(name) = params
            .names()
            .find(|name| !expected.iter().any(|(n, _)| n == name))
        {
            return Err(ModelError::UnexpectedTensor {
                name: name.to_owned(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Dense {
    inputs: usize,
    weight: Vec<f32>,
    bias: Vec<f32>,
}

impl Dense {
    fn forward(&self, input: &[f32], activation: fn(f32) -> f32) -> Vec<f32> {
        self.weight
            .chunks_exact(self.inputs.max(1))
            .zip(&self.bias)
            .map(|(row, b)| {
                let sum = row.iter().zip(input).map(|(w, x)| w * x).sum::<f32>() + b;
                activation(sum)
            })
            .collect()
    }
}

/// A validated perceptron ready for inference.
#[derive(Debug, Clone)]
pub struct Mlp {
    spec: MlpSpec,
    fc1: Dense,
    fc2: Dense,
}

impl Mlp {
    pub fn new(spec: MlpSpec, params: &ParameterSet) -> Result<Self, ModelError> {
        spec.validate(params)?;
        let layer = |prefix: &str, inputs: usize| -> Result<Dense, ModelError> {
            let get = |suffix: &str| {
                let name = format!("{prefix}.{suffix}");
                params
                    .get(&name)
                    .map(|t| t.values().to_vec())
                    .ok_or(ModelError::MissingTensor { name })
            };
            Ok(Dense {
                inputs,
                weight: get("weight")?,
                bias: get("bias")?,
            })
        };
        Ok(Self {
            spec,
            fc1: layer("fc1", spec.input)?,
            fc2: layer("fc2", spec.hidden)?,
        })
    }

    #[must_use]
    pub fn spec(&self) -> MlpSpec {
        self.spec
    }

    /// Runs the network on one feature vector.
    #[must_use]
    pub fn forward(&self, input: &[f32]) -> Vec<f32> {
        debug_assert_eq!(input.len(), self.spec.input);
        let hidden = self.fc1.forward(input, relu);
        self.fc2.forward(&hidden, sigmoid)
    }
}

fn relu(x: f32) -> f32 {
    x.max(0.0)
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng as _;
    use rand_pcg::Pcg32;

    use super::*;

    const SPEC: MlpSpec = MlpSpec {
        input: 2,
        hidden: 2,
        output: 1,
    };

    fn tensor(shape: &[usize], values: &[f32]) -> Tensor {
        Tensor::new(Shape::new(shape), values.to_vec()).unwrap()
    }

    fn hand_built() -> ParameterSet {
        let mut params = ParameterSet::new();
        params.insert("fc1.weight", tensor(&[2, 2], &[1.0, 0.0, 0.0, -1.0]));
        params.insert("fc1.bias", tensor(&[2], &[0.0, 0.0]));
        params.insert("fc2.weight", tensor(&[1, 2], &[1.0, 1.0]));
        params.insert("fc2.bias", tensor(&[1], &[0.0]));
        params
    }

    #[test]
    fn test_init_matches_declared_shapes() {
        let spec = MlpSpec::default();
        let params = spec.init(&mut Pcg32::seed_from_u64(7));
        spec.validate(&params).unwrap();
        assert_eq!(params.len(), 4);

        let bound = 1.0 / 10f32.sqrt();
        let w = params.get("fc1.weight").unwrap();
        assert!(w.values().iter().all(|v| v.abs() <= bound));
    }

    #[test]
    fn test_validate_reports_shape_mismatch() {
        let mut params = hand_built();
        params.insert("fc2.bias", tensor(&[2], &[0.0, 0.0]));
        assert!(matches!(
            SPEC.validate(&params),
            Err(ModelError::ShapeMismatch { name, .. }) if name == "fc2.bias"
        ));
    }

    #[test]
    fn test_validate_reports_missing_and_unexpected() {
        let mut params = hand_built();
        params.insert("fc3.bias", tensor(&[1], &[0.0]));
        assert!(matches!(
            SPEC.validate(&params),
            Err(ModelError::UnexpectedTensor { .. })
        ));

        let params: ParameterSet = hand_built()
            .iter()
            .filter(|(name, _)| *name != "fc1.bias")
            .map(|(n, t)| (n.clone(), t.clone()))
            .collect();
        assert!(matches!(
            SPEC.validate(&params),
            Err(ModelError::MissingTensor { .. })
        ));
    }

    #[test]
    fn test_forward_applies_relu_then_sigmoid() {
        let mlp = Mlp::new(SPEC, &hand_built()).unwrap();

        // hidden = relu([x0, -x1]); output = sigmoid(h0 + h1)
        let out = mlp.forward(&[2.0, 3.0]);
        assert_eq!(out.len(), 1);
        assert!((out[0] - sigmoid(2.0)).abs() < 1e-6);

        let out = mlp.forward(&[0.0, -1.0]);
        assert!((out[0] - sigmoid(1.0)).abs() < 1e-6);

        let out = mlp.forward(&[0.0, 0.0]);
        assert!((out[0] - 0.5).abs() < 1e-6);
    }
}

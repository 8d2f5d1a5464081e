//! Named numeric tensors with declared shapes.
//!
//! A model's trainable state is a [`ParameterSet`]: a map from tensor name
//! (`"fc1.weight"`, `"fc1.bias"`, ...) to a dense row-major [`Tensor`]. Shapes
//! are checked whenever a tensor is built or deserialized, so a parameter set
//! read from disk can be trusted to match its own shapes.

use std::collections::{BTreeMap, btree_map};

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Dimensions of a tensor, outermost first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display)]
#[display("{_0:?}")]
#[serde(transparent)]
pub struct Shape(Vec<usize>);

impl Shape {
    #[must_use]
    pub fn new(dims: impl Into<Vec<usize>>) -> Self {
        Self(dims.into())
    }

    #[must_use]
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Total number of elements, or `None` if the count overflows `usize`.
    #[must_use]
    pub fn numel(&self) -> Option<usize> {
        self.0.iter().try_fold(1_usize, |n, &dim| n.checked_mul(dim))
    }

    /// Number of rows: the outermost dimension, or 1 for a scalar.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.0.first().copied().unwrap_or(1)
    }

    /// Elements per row.
    #[must_use]
    pub fn row_len(&self) -> usize {
        self.0.iter().skip(1).fold(1, |n, &dim| n.saturating_mul(dim))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTensor")]
pub struct Tensor {
    shape: Shape,
    values: Vec<f32>,
}

#[derive(Deserialize)]
struct RawTensor {
    shape: Shape,
    values: Vec<f32>,
}

impl TryFrom<RawTensor> for Tensor {
    type Error = ModelError;

    fn try_from(raw: RawTensor) -> Result<Self, Self::Error> {
        Self::new(raw.shape, raw.values)
    }
}

impl Tensor {
    pub fn new(shape: Shape, values: Vec<f32>) -> Result<Self, ModelError> {
        if shape.numel() != Some(values.len()) {
            return Err(ModelError::ValueCount {
                shape,
                len: values.len(),
            });
        }
        Ok(Self { shape, values })
    }

    #[must_use]
    pub fn zeros(shape: Shape) -> Self {
        Self::from_fn(shape, |_| 0.0)
    }

    /// Builds a tensor by applying `f` to each flat index.
    ///
    /// # Panics
    ///
    /// Panics if the element count of `shape` overflows `usize`.
    #[must_use]
    pub fn from_fn<F>(shape: Shape, f: F) -> Self
    where
        F: FnMut(usize) -> f32,
    {
        let Some(len) = shape.numel() else {
            panic!("shape {shape} has more elements than fit in memory");
        };
        let values = (0..len).map(f).collect();
        Self { shape, values }
    }

    #[must_use]
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    #[must_use]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Mutable access to the elements. The shape cannot change through this.
    #[must_use]
    pub fn values_mut(&mut self) -> &mut [f32] {
        &mut self.values
    }
}

/// Named tensors making up one model's parameters.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet {
    tensors: BTreeMap<String, Tensor>,
}

impl ParameterSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) -> Option<Tensor> {
        self.tensors.insert(name.into(), tensor)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Tensor> {
        self.tensors.iter()
    }

    pub fn iter_mut(&mut self) -> btree_map::IterMut<'_, String, Tensor> {
        self.tensors.iter_mut()
    }

    /// Returns true if both sets hold the same names with the same shapes.
    #[must_use]
    pub fn same_layout(&self, other: &Self) -> bool {
        self.tensors.len() == other.tensors.len()
            && self
                .tensors
                .iter()
                .zip(&other.tensors)
                .all(|((n1, t1), (n2, t2))| n1 == n2 && t1.shape == t2.shape)
    }
}

impl<'a> IntoIterator for &'a ParameterSet {
    type Item = (&'a String, &'a Tensor);
    type IntoIter = btree_map::Iter<'a, String, Tensor>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl FromIterator<(String, Tensor)> for ParameterSet {
    fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = (String, Tensor)>,
    {
        Self {
            tensors: iter.into_iter().collect(),
        }
    }
}

//! Individuals and populations.
//!
//! An [`Individual`] is a candidate policy: one parameter set plus its position
//! in the current generation. Ids run `0..N` and are reassigned every
//! generation, so an id only identifies an individual within one
//! [`Population`].

use std::collections::BTreeMap;

use marbler_policy::{model::MlpSpec, tensor::ParameterSet};
use rand::Rng;

/// Fitness per individual id.
pub type Scores = BTreeMap<usize, f32>;

/// How an individual came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display, derive_more::IsVariant)]
pub enum Origin {
    /// Freshly initialized parameters.
    #[display("seed")]
    Seed,
    /// Verbatim copy of a stored checkpoint.
    #[display("resumed")]
    Resumed,
    /// Verbatim copy of the previous generation's elite.
    #[display("elite")]
    Elite,
    /// Mutated copy of the elite.
    #[display("mutated")]
    Mutated,
    /// Mutated crossover of the elite and the runner-up.
    #[display("crossover")]
    Crossover,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Individual {
    id: usize,
    parameters: ParameterSet,
    origin: Origin,
}

impl Individual {
    #[must_use]
    pub fn new(id: usize, parameters: ParameterSet, origin: Origin) -> Self {
        Self {
            id,
            parameters,
            origin,
        }
    }

    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    #[must_use]
    pub fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    #[must_use]
    pub fn origin(&self) -> Origin {
        self.origin
    }
}

/// The individuals evaluated together in one generation.
#[derive(Debug, Clone, PartialEq)]
pub struct Population {
    generation: u32,
    individuals: Vec<Individual>,
}

impl Population {
    /// Creates a population from individuals whose ids are their positions.
    ///
    /// # Panics
    ///
    /// Panics if an individual's id differs from its index.
    #[must_use]
    pub fn new(generation: u32, individuals: Vec<Individual>) -> Self {
        assert!(
            individuals.iter().enumerate().all(|(i, ind)| ind.id == i),
            "individual ids must match their positions"
        );
        Self {
            generation,
            individuals,
        }
    }

    /// Creates `size` individuals with independently initialized parameters.
    pub fn seeded<R>(generation: u32, size: usize, spec: &MlpSpec, rng: &mut R) -> Self
    where
        R: Rng + ?Sized,
    {
        let individuals = (0..size)
            .map(|id| Individual::new(id, spec.init(rng), Origin::Seed))
            .collect();
        Self::new(generation, individuals)
    }

    #[must_use]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    #[must_use]
    pub fn individuals(&self) -> &[Individual] {
        &self.individuals
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.individuals.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.individuals.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: usize) -> Option<&Individual> {
        self.individuals.get(id)
    }

    /// Returns the best-scoring individual.
    ///
    /// Ties go to the lowest id. Individuals without a score (or with a NaN
    /// score) are not eligible. Returns `None` if nobody is eligible.
    #[must_use]
    pub fn elite(&self, scores: &Scores) -> Option<(&Individual, f32)> {
        self.ranked(scores).into_iter().next()
    }

    /// Eligible individuals ordered by descending score, ties by ascending id.
    #[must_use]
    pub fn ranked(&self, scores: &Scores) -> Vec<(&Individual, f32)> {
        let mut ranked = self
            .individuals
            .iter()
            .filter_map(|ind| {
                let score = *scores.get(&ind.id)?;
                (!score.is_nan()).then_some((ind, score))
            })
            .collect::<Vec<_>>();
        // stable sort keeps ascending id order among equal scores
        ranked.sort_by(|(_, a), (_, b)| b.total_cmp(a));
        ranked
    }
}

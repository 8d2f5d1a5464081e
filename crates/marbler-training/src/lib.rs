//! Evolutionary training of marble race policies.
//!
//! This crate evolves the parameters of the model-driven policy from
//! `marbler-policy`. Every individual of a population races once in its own
//! simulation session, its race result becomes its fitness, and the best
//! individual seeds the next generation.
//!
//! # How Training Works
//!
//! 1. **Population** - Create `N` individuals, each with freshly initialized
//!    model parameters (or resume from a stored elite)
//! 2. **Rollout** - Every individual drives its own simulation session
//!    concurrently until the race ends
//! 3. **Fitness** - Race results are turned into a score in `[0, 1]`
//! 4. **Selection** - The highest score wins, ties go to the lowest id
//! 5. **Reproduction** - The winner is kept unchanged and fills the rest of the
//!    population with mutated copies
//! 6. **Checkpoint** - The winner is stored under the generation's index
//!
//! # Architecture
//!
//! ```text
//! PopulationManager
//!     ↓ hands individuals to
//! RolloutCoordinator ── one thread per individual ──> Session (marbler-env)
//!     ↓ telemetry
//! FitnessEvaluator
//!     ↓ scores
//! Mutation / RowSplitCrossover
//!     ↓ next generation
//! CheckpointStore
//! ```
//!
//! # Modules
//!
//! - [`population`] - individuals, populations and elite ranking
//! - [`rollout`] - concurrent rollouts and their telemetry
//! - [`fitness`] - scoring race results
//! - [`operators`] - mutation and crossover
//! - [`checkpoint`] - per-generation persistence
//! - [`config`] - run configuration
//! - [`manager`] - the generation loop

pub mod checkpoint;
pub mod config;
pub mod fitness;
pub mod manager;
pub mod operators;
pub mod population;
pub mod rollout;

#[cfg(test)]
mod testing;

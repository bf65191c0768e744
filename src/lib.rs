//! onhash: online maintenance of binary hash indexes.
//!
//! A hash function learned from a stream keeps changing, but the hash table
//! built from it is expensive to recompute: O(N · D · B) for N database rows,
//! D features and B code bits. This crate runs the streaming loop that keeps
//! the two apart and decides, every so often, whether the learner has moved
//! far enough to justify a rebuild.
//!
//! - `trainer`: the loop ([`OnlineTrainer`], [`TrainingRun`])
//! - `learner`: hash learners ([`HashLearner`])
//! - `reservoir`: bounded stream sample used to estimate index drift
//! - `trigger`: rebuild policies ([`TriggerPolicy`])
//! - `index`: the published table ([`PublishedIndex`])
//! - `checkpoint`: write-once snapshots for later evaluation
//! - `evaluation`: Hamming-ranking mAP / precision / recall
//!
//! # Critical Nuances
//!
//! ## The published index is never patched
//!
//! `PublishedIndex` holds the codes and the projection they came from as one
//! value. A commit builds a complete new table and swaps it in; a failure at
//! any point leaves the previous pair untouched.
//!
//! ## Reservoir codes lag on purpose
//!
//! Reservoir codes are always computed with the *committed* projection, so
//! comparing them with the reservoir encoded under the *current* projection
//! measures exactly how much a rebuild would change, at reservoir cost
//! instead of database cost.
//!
//! ## Trigger cadence
//!
//! The trigger is consulted at iteration `i` iff
//! `(i * batch_size) % update_interval == 0`. With a short final batch this
//! is the nominal example count, not the true one.

pub mod checkpoint;
pub mod codes;
pub mod config;
pub mod dataset;
pub mod error;
pub mod evaluation;
pub mod index;
pub mod learner;
pub mod matrix;
pub mod projection;
pub mod reservoir;
pub mod schedule;
pub mod simd;
pub mod stats;
pub mod trainer;
pub mod trials;
pub mod trigger;

// Re-exports
pub use checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use codes::BinaryCodes;
pub use config::TrainingConfig;
pub use dataset::{Dataset, Labels};
pub use error::{OnlineError, Result};
pub use index::PublishedIndex;
pub use learner::HashLearner;
pub use matrix::Matrix;
pub use projection::Projection;
pub use reservoir::{Reservoir, ReservoirMaintainer, ReservoirSample};
pub use stats::{CostStats, RunSummary};
pub use trainer::{OnlineTrainer, StepOutcome, TrainingRun};
pub use trials::run_trials;
pub use trigger::{TriggerContext, TriggerPolicy};

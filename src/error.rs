//! Error types for onhash.

use crate::checkpoint::PersistenceError;
use thiserror::Error;

/// Errors that can occur while driving an online hashing run.
#[derive(Debug, Error)]
pub enum OnlineError {
    /// Invalid or missing configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// More training rows requested than the dataset holds.
    #[error("requested {requested} training rows but the dataset has only {available}")]
    InsufficientTrainingRows { requested: usize, available: usize },

    /// Dimension mismatch between a feature row and a projection or matrix.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// An operation needed at least one row and got none.
    #[error("empty input: {0}")]
    EmptyInput(String),

    /// Failure reported by a hash learner.
    #[error("hash learner failed: {0}")]
    Learner(String),

    /// Failure reported by a reservoir maintainer.
    #[error("reservoir update failed: {0}")]
    Reservoir(String),

    /// Failure reported by a trigger policy.
    #[error("trigger policy failed: {0}")]
    Trigger(String),

    /// Checkpoint persistence failed.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

pub type Result<T> = std::result::Result<T, OnlineError>;

//! Cost accounting for a run.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cumulative costs of one run. All counters start at zero and only grow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostStats {
    /// Time spent in learner updates.
    pub time_train: Duration,
    /// Time spent in reservoir maintenance and trigger checks.
    pub time_reserve: Duration,
    /// Time spent recomputing the hash table.
    pub time_update: Duration,
    /// Total code bits rewritten across all commits.
    pub bits_computed: u64,
    /// Iterations at which a commit happened, strictly increasing.
    pub update_iters: Vec<usize>,
    /// Iterations at which checkpoints were requested.
    pub test_iters: Vec<usize>,
}

impl CostStats {
    pub fn new(test_iters: Vec<usize>) -> Self {
        Self {
            test_iters,
            ..Self::default()
        }
    }

    /// Record a commit at `iteration` that rewrote `bits` code bits.
    pub fn record_commit(&mut self, iteration: usize, bits: u64, elapsed: Duration) {
        debug_assert!(self.update_iters.last().map_or(true, |&last| last < iteration));
        self.update_iters.push(iteration);
        self.bits_computed += bits;
        self.time_update += elapsed;
    }

    /// Number of commits so far.
    pub fn ht_updates(&self) -> usize {
        self.update_iters.len()
    }

    pub fn summary(&self, trial: usize, method: &str, iterations: usize) -> RunSummary {
        RunSummary {
            trial,
            method: method.to_string(),
            iterations,
            ht_updates: self.ht_updates(),
            bits_computed: self.bits_computed,
            time_train: self.time_train.as_secs_f64(),
            time_update: self.time_update.as_secs_f64(),
            time_reserv: self.time_reserve.as_secs_f64(),
            update_iters: self.update_iters.clone(),
            test_iters: self.test_iters.clone(),
        }
    }
}

/// Scalar result of a run, returned to the caller. Holds no matrices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub trial: usize,
    pub method: String,
    pub iterations: usize,
    pub ht_updates: usize,
    pub bits_computed: u64,
    /// Seconds.
    pub time_train: f64,
    /// Seconds.
    pub time_update: f64,
    /// Seconds.
    pub time_reserv: f64,
    pub update_iters: Vec<usize>,
    pub test_iters: Vec<usize>,
}

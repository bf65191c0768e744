//! Run configuration.
//!
//! [`TrainingConfig`] is the option set consumed by the training loop. It can
//! be built in code with the `with_*` methods or loaded from JSON, where the
//! camelCase option names (`numTrain`, `batchSize`, `updateInterval`,
//! `reservoirSize`, `methodID`) are accepted alongside snake_case.

use crate::error::{OnlineError, Result};
use serde::{Deserialize, Serialize};

/// Options for one online hashing run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainingConfig {
    /// Number of passes over the sampled training rows.
    pub epoch: usize,

    /// Rows sampled (without replacement) per epoch.
    #[serde(rename = "numTrain", alias = "num_train")]
    pub num_train: usize,

    /// Rows handed to the learner per iteration.
    #[serde(rename = "batchSize", alias = "batch_size")]
    pub batch_size: usize,

    /// Trigger is consulted when `(iteration * batch_size) % update_interval == 0`.
    #[serde(rename = "updateInterval", alias = "update_interval")]
    pub update_interval: usize,

    /// Reservoir capacity; 0 disables the reservoir.
    #[serde(rename = "reservoirSize", alias = "reservoir_size", default)]
    pub reservoir_size: usize,

    /// Ignore labels even if the dataset has them.
    #[serde(default)]
    pub unsupervised: bool,

    /// Free-form run identifier, attached to the trial span.
    #[serde(default)]
    pub identifier: String,

    /// Name of the hashing method (used in logs).
    #[serde(rename = "methodID", alias = "method_id", default)]
    pub method_id: String,

    /// Base seed for the schedule, learner and reservoir.
    #[serde(default)]
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epoch: 1,
            num_train: 1_000,
            batch_size: 1,
            update_interval: 100,
            reservoir_size: 0,
            unsupervised: false,
            identifier: String::new(),
            method_id: String::new(),
            seed: 0,
        }
    }
}

impl TrainingConfig {
    /// Parse from JSON. Unknown options and missing required options are errors.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| OnlineError::InvalidConfig(e.to_string()))
    }

    pub fn with_epoch(mut self, epoch: usize) -> Self {
        self.epoch = epoch;
        self
    }

    pub fn with_num_train(mut self, num_train: usize) -> Self {
        self.num_train = num_train;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_update_interval(mut self, update_interval: usize) -> Self {
        self.update_interval = update_interval;
        self
    }

    pub fn with_reservoir_size(mut self, reservoir_size: usize) -> Self {
        self.reservoir_size = reservoir_size;
        self
    }

    pub fn with_unsupervised(mut self, unsupervised: bool) -> Self {
        self.unsupervised = unsupervised;
        self
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    pub fn with_method_id(mut self, method_id: impl Into<String>) -> Self {
        self.method_id = method_id.into();
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Check the options against a dataset with `n_rows` rows.
    pub fn validate(&self, n_rows: usize) -> Result<()> {
        for (name, value) in [
            ("epoch", self.epoch),
            ("numTrain", self.num_train),
            ("batchSize", self.batch_size),
            ("updateInterval", self.update_interval),
        ] {
            if value == 0 {
                return Err(OnlineError::InvalidConfig(format!("{name} must be > 0")));
            }
        }
        if self.num_train > n_rows {
            return Err(OnlineError::InsufficientTrainingRows {
                requested: self.num_train,
                available: n_rows,
            });
        }
        Ok(())
    }

    /// Total streamed examples (`epoch * numTrain`).
    pub fn stream_len(&self) -> usize {
        self.epoch * self.num_train
    }

    /// Number of loop iterations (`ceil(stream_len / batchSize)`).
    pub fn num_iterations(&self) -> usize {
        self.stream_len().div_ceil(self.batch_size.max(1))
    }

    /// Whether the trigger is consulted at 1-based `iteration`.
    ///
    /// Applies the modulus to the nominal example count even when the last
    /// batch is short.
    #[inline]
    pub fn is_trigger_iteration(&self, iteration: usize) -> bool {
        self.update_interval > 0 && (iteration * self.batch_size) % self.update_interval == 0
    }

    /// Whether the reservoir is enabled.
    pub fn reservoir_enabled(&self) -> bool {
        self.reservoir_size > 0
    }
}

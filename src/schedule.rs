//! Training index schedule.
//!
//! The stream is simulated by concatenating `epoch` independent draws of
//! `num_train` distinct row indices (each draw uniformly shuffled) and then
//! slicing the result into consecutive batches.

use crate::config::TrainingConfig;
use crate::error::{OnlineError, Result};
use rand::rngs::StdRng;
use rand::seq::{index, SliceRandom};
use rand::SeedableRng;

/// Precomputed ordered sequence of dataset row indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingSchedule {
    indices: Vec<usize>,
    batch_size: usize,
}

impl TrainingSchedule {
    /// Draw the schedule for a dataset of `n_rows` rows.
    pub fn build(config: &TrainingConfig, n_rows: usize, seed: u64) -> Result<Self> {
        config.validate(n_rows)?;
        let mut rng = StdRng::seed_from_u64(seed);

        let mut indices = Vec::with_capacity(config.stream_len());
        for _ in 0..config.epoch {
            let mut draw = index::sample(&mut rng, n_rows, config.num_train).into_vec();
            draw.shuffle(&mut rng);
            indices.extend(draw);
        }

        Ok(Self {
            indices,
            batch_size: config.batch_size,
        })
    }

    /// Wrap an explicit index sequence.
    pub fn from_indices(indices: Vec<usize>, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(OnlineError::InvalidConfig("batchSize must be > 0".into()));
        }
        Ok(Self { indices, batch_size })
    }

    /// Total streamed examples.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn num_iterations(&self) -> usize {
        self.indices.len().div_ceil(self.batch_size)
    }

    /// Row indices of 1-based `iteration`; the last batch may be short.
    pub fn batch(&self, iteration: usize) -> &[usize] {
        if iteration == 0 {
            return &[];
        }
        let start = ((iteration - 1) * self.batch_size).min(self.indices.len());
        let end = (start + self.batch_size).min(self.indices.len());
        &self.indices[start..end]
    }

    /// `(iteration, batch)` pairs in stream order, iterations starting at 1.
    pub fn batches(&self) -> impl Iterator<Item = (usize, &[usize])> {
        self.indices
            .chunks(self.batch_size)
            .enumerate()
            .map(|(i, b)| (i + 1, b))
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.indices
    }
}

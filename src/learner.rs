//! Hash learners.
//!
//! A [`HashLearner`] produces the projection the trainer hashes with. The
//! trainer owns the projection value and threads it through
//! [`HashLearner::update`] each iteration; any learner-internal state
//! (momentum, pair buffers, counters) lives in the learner itself.
//!
//! Two learners ship with the crate:
//!
//! | Learner | Init | Update |
//! |---------|------|--------|
//! | [`StaticLearner`] | Gaussian hyperplanes (SimHash) | none; the baseline LSH |
//! | [`OnlineSimilarityLearner`] | Gaussian hyperplanes | SGD on pairwise code agreement |

use crate::config::TrainingConfig;
use crate::dataset::{shares_label, Dataset};
use crate::error::{OnlineError, Result};
use crate::matrix::Matrix;
use crate::projection::Projection;
use crate::simd::{axpy, cosine};

/// Incrementally trained hash function.
pub trait HashLearner {
    /// Short method name used in logs.
    fn name(&self) -> &str;

    /// Produce the initial projection for a database of `features`.
    ///
    /// `config.seed` is already specialized to the trial.
    fn initialize(&mut self, features: &Matrix, config: &TrainingConfig) -> Result<Projection>;

    /// Fold one batch into the projection.
    ///
    /// Returns the new projection and the dataset rows actually consumed.
    fn update(
        &mut self,
        projection: Projection,
        dataset: &Dataset,
        batch: &[usize],
        iteration: usize,
        config: &TrainingConfig,
    ) -> Result<(Projection, Vec<usize>)>;
}

/// Random-hyperplane hashing that never learns.
#[derive(Debug, Clone)]
pub struct StaticLearner {
    bits: usize,
}

impl StaticLearner {
    pub fn new(bits: usize) -> Self {
        Self { bits }
    }
}

impl HashLearner for StaticLearner {
    fn name(&self) -> &str {
        "lsh"
    }

    fn initialize(&mut self, features: &Matrix, config: &TrainingConfig) -> Result<Projection> {
        Projection::gaussian(features.cols(), self.bits, config.seed)
    }

    fn update(
        &mut self,
        projection: Projection,
        _dataset: &Dataset,
        batch: &[usize],
        _iteration: usize,
        _config: &TrainingConfig,
    ) -> Result<(Projection, Vec<usize>)> {
        Ok((projection, batch.to_vec()))
    }
}

/// Configuration for [`OnlineSimilarityLearner`].
#[derive(Debug, Clone)]
pub struct SimilarityLearnerConfig {
    /// Code length (B).
    pub bits: usize,
    /// SGD step size.
    pub learning_rate: f32,
    /// Scale of the initial Gaussian hyperplanes.
    pub init_scale: f32,
}

impl Default for SimilarityLearnerConfig {
    fn default() -> Self {
        Self {
            bits: 32,
            learning_rate: 0.05,
            init_scale: 1.0,
        }
    }
}

/// Online learner that pulls codes of similar pairs together.
///
/// Consecutive stream rows form pairs `(x_i, x_j)` with target `s = ±1`:
/// shared label when supervised, positive raw cosine when unsupervised.
/// Each pair takes one SGD step on
///
/// ```text
/// L = (s - tanh(W x_i) · tanh(W x_j) / B)^2
/// ```
///
/// The last row of a batch is carried over so batch size 1 still forms pairs.
#[derive(Debug, Clone)]
pub struct OnlineSimilarityLearner {
    config: SimilarityLearnerConfig,
    previous: Option<usize>,
    steps: u64,
}

impl OnlineSimilarityLearner {
    pub fn new(config: SimilarityLearnerConfig) -> Self {
        Self {
            config,
            previous: None,
            steps: 0,
        }
    }

    /// Number of pair updates applied so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    fn target(&self, dataset: &Dataset, i: usize, j: usize, unsupervised: bool) -> f32 {
        let labels = dataset.labels();
        let similar = match (unsupervised, labels.get(i), labels.get(j)) {
            (false, Some(a), Some(b)) => shares_label(a, b),
            _ => cosine(dataset.features().row(i), dataset.features().row(j)) > 0.0,
        };
        if similar {
            1.0
        } else {
            -1.0
        }
    }

    fn step(&mut self, w: &mut Projection, xi: &[f32], xj: &[f32], s: f32) {
        let bits = w.bits();
        let hi: Vec<f32> = w.scores(xi).into_iter().map(f32::tanh).collect();
        let hj: Vec<f32> = w.scores(xj).into_iter().map(f32::tanh).collect();
        let agreement: f32 = hi.iter().zip(&hj).map(|(a, b)| a * b).sum::<f32>() / bits as f32;
        let residual = s - agreement;
        // descent direction of the squared residual
        let scale = 2.0 * self.config.learning_rate * residual / bits as f32;

        for b in 0..bits {
            let gi = hj[b] * (1.0 - hi[b] * hi[b]);
            let gj = hi[b] * (1.0 - hj[b] * hj[b]);
            let plane = w.hyperplane_mut(b);
            axpy(scale * gi, xi, plane);
            axpy(scale * gj, xj, plane);
        }
        self.steps += 1;
    }
}

impl Default for OnlineSimilarityLearner {
    fn default() -> Self {
        Self::new(SimilarityLearnerConfig::default())
    }
}

impl HashLearner for OnlineSimilarityLearner {
    fn name(&self) -> &str {
        "sgd-pairwise"
    }

    fn initialize(&mut self, features: &Matrix, config: &TrainingConfig) -> Result<Projection> {
        if self.config.bits == 0 {
            return Err(OnlineError::Learner("code length must be > 0".into()));
        }
        self.previous = None;
        self.steps = 0;
        let mut w = Projection::gaussian(features.cols(), self.config.bits, config.seed)?;
        if self.config.init_scale != 1.0 {
            for b in 0..w.bits() {
                w.hyperplane_mut(b)
                    .iter_mut()
                    .for_each(|v| *v *= self.config.init_scale);
            }
        }
        Ok(w)
    }

    fn update(
        &mut self,
        mut projection: Projection,
        dataset: &Dataset,
        batch: &[usize],
        _iteration: usize,
        config: &TrainingConfig,
    ) -> Result<(Projection, Vec<usize>)> {
        if dataset.dim() != projection.dim() {
            return Err(OnlineError::DimensionMismatch {
                expected: projection.dim(),
                actual: dataset.dim(),
            });
        }
        if let Some(&bad) = batch.iter().find(|&&i| i >= dataset.len()) {
            return Err(OnlineError::Learner(format!(
                "batch row {bad} out of bounds for {} rows",
                dataset.len()
            )));
        }

        let unsupervised = config.unsupervised || !dataset.labels().is_labeled();
        let mut prev = self.previous;
        for &j in batch {
            if let Some(i) = prev {
                let s = self.target(dataset, i, j, unsupervised);
                let features = dataset.features();
                self.step(&mut projection, features.row(i), features.row(j), s);
            }
            prev = Some(j);
        }
        self.previous = prev;

        Ok((projection, batch.to_vec()))
    }
}

//! Datasets streamed through an online hashing run.
//!
//! A [`Dataset`] pairs an N×D feature matrix with per-row labels. Labels are
//! optional: unsupervised runs carry [`Labels::Unlabeled`]. A labelled row may
//! carry several tags (multi-label data); two rows are neighbors iff they share
//! at least one tag.

use crate::error::{OnlineError, Result};
use crate::matrix::Matrix;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Tags attached to one row. Most datasets are single-label.
pub type LabelSet = SmallVec<[u32; 4]>;

/// Per-row label structure.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Labels {
    /// No supervision available.
    #[default]
    Unlabeled,
    /// One tag set per row.
    Tags(Vec<LabelSet>),
}

impl Labels {
    /// Single-label classes, one per row.
    pub fn from_classes(classes: &[u32]) -> Self {
        Labels::Tags(classes.iter().map(|&c| smallvec::smallvec![c]).collect())
    }

    pub fn is_labeled(&self) -> bool {
        matches!(self, Labels::Tags(_))
    }

    /// Number of labelled rows (zero when unlabeled).
    pub fn len(&self) -> usize {
        match self {
            Labels::Unlabeled => 0,
            Labels::Tags(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, i: usize) -> Option<&LabelSet> {
        match self {
            Labels::Unlabeled => None,
            Labels::Tags(t) => t.get(i),
        }
    }

    /// Gather the labels of the given rows; unlabeled stays unlabeled.
    pub fn select(&self, indices: &[usize]) -> Result<Self> {
        match self {
            Labels::Unlabeled => Ok(Labels::Unlabeled),
            Labels::Tags(tags) => indices
                .iter()
                .map(|&i| {
                    tags.get(i).cloned().ok_or_else(|| {
                        OnlineError::InvalidConfig(format!(
                            "label index {i} out of bounds for {} rows",
                            tags.len()
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()
                .map(Labels::Tags),
        }
    }

    /// Append one row's tags. Appending to `Unlabeled` is a no-op.
    pub fn push(&mut self, tags: Option<&LabelSet>) {
        if let (Labels::Tags(all), Some(t)) = (self, tags) {
            all.push(t.clone());
        }
    }
}

/// Whether two tag sets share a tag.
#[inline]
pub fn shares_label(a: &LabelSet, b: &LabelSet) -> bool {
    a.iter().any(|x| b.contains(x))
}

/// Immutable feature matrix plus labels.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    features: Matrix,
    labels: Labels,
}

impl Dataset {
    /// Pair features with labels. Labelled datasets need one label row per feature row.
    pub fn new(features: Matrix, labels: Labels) -> Result<Self> {
        if labels.is_labeled() && labels.len() != features.rows() {
            return Err(OnlineError::DimensionMismatch {
                expected: features.rows(),
                actual: labels.len(),
            });
        }
        Ok(Self { features, labels })
    }

    pub fn unlabeled(features: Matrix) -> Self {
        Self {
            features,
            labels: Labels::Unlabeled,
        }
    }

    pub fn features(&self) -> &Matrix {
        &self.features
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    /// Number of rows (N).
    pub fn len(&self) -> usize {
        self.features.rows()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Feature dimension (D).
    pub fn dim(&self) -> usize {
        self.features.cols()
    }

    /// Gather rows into a new dataset.
    pub fn select(&self, indices: &[usize]) -> Result<Self> {
        Ok(Self {
            features: self.features.select_rows(indices)?,
            labels: self.labels.select(indices)?,
        })
    }

    /// Randomly split off `n_query` rows as a query set; the rest is the database.
    ///
    /// Returns `(queries, database)`.
    pub fn split(&self, n_query: usize, seed: u64) -> Result<(Self, Self)> {
        if n_query > self.len() {
            return Err(OnlineError::InsufficientTrainingRows {
                requested: n_query,
                available: self.len(),
            });
        }
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.shuffle(&mut StdRng::seed_from_u64(seed));
        let (q, db) = order.split_at(n_query);
        Ok((self.select(q)?, self.select(db)?))
    }
}

/// Standard normal draw via Box-Muller.
pub(crate) fn gaussian<R: Rng + ?Sized>(rng: &mut R) -> f32 {
    // 1 - u keeps the log argument in (0, 1]
    let u1: f32 = 1.0 - rng.random::<f32>();
    let u2: f32 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
}

/// Labelled clustered dataset: one Gaussian blob per class, centers in `[-1, 1]^d`.
///
/// # Arguments
///
/// * `n` - Number of rows
/// * `dimension` - Feature dimensionality
/// * `n_classes` - Number of classes (clusters)
/// * `cluster_std` - Standard deviation within a cluster
/// * `seed` - Random seed for reproducibility
pub fn generate_clustered(
    n: usize,
    dimension: usize,
    n_classes: usize,
    cluster_std: f32,
    seed: u64,
) -> Result<Dataset> {
    if n_classes == 0 {
        return Err(OnlineError::InvalidConfig("n_classes must be > 0".into()));
    }
    let mut rng = StdRng::seed_from_u64(seed);

    let centers: Vec<Vec<f32>> = (0..n_classes)
        .map(|_| (0..dimension).map(|_| rng.random_range(-1.0f32..1.0)).collect())
        .collect();

    let mut data = Vec::with_capacity(n * dimension);
    let mut classes = Vec::with_capacity(n);
    for _ in 0..n {
        let class = rng.random_range(0..n_classes);
        for &c in &centers[class] {
            data.push(c + gaussian(&mut rng) * cluster_std);
        }
        classes.push(class as u32);
    }

    Dataset::new(
        Matrix::new(n, dimension, data)?,
        Labels::from_classes(&classes),
    )
}

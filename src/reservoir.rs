//! Bounded reservoir of stream samples.
//!
//! The reservoir is a cheap stand-in for the database: the trigger policy
//! compares the reservoir's codes under the committed projection
//! (`ReservoirSample::codes`) with its codes under the learner's current
//! projection to estimate how much a full rebuild would change.
//!
//! # Invariants
//!
//! - `len() <= capacity` after every maintainer update.
//! - `codes` row `k` is `sign(features[k] · W_snapshot)` for the committed
//!   projection at all times: admitted points are encoded with the
//!   reference projection the maintainer is handed, and the trainer swaps
//!   in candidate codes only when it commits.

use crate::codes::BinaryCodes;
use crate::dataset::Labels;
use crate::error::{OnlineError, Result};
use crate::matrix::Matrix;
use crate::projection::Projection;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Reservoir state: disabled (capacity 0) or an active sample.
#[derive(Debug, Clone, PartialEq)]
pub enum Reservoir {
    Disabled,
    Active(ReservoirSample),
}

impl Reservoir {
    /// Empty reservoir for the given shape, or `Disabled` when `capacity == 0`.
    pub fn new(capacity: usize, dim: usize, bits: usize, supervised: bool) -> Self {
        if capacity == 0 {
            Reservoir::Disabled
        } else {
            Reservoir::Active(ReservoirSample::empty(dim, bits, supervised))
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Reservoir::Active(_))
    }

    /// Sample size (0 when disabled).
    pub fn len(&self) -> usize {
        match self {
            Reservoir::Disabled => 0,
            Reservoir::Active(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sample(&self) -> Option<&ReservoirSample> {
        match self {
            Reservoir::Disabled => None,
            Reservoir::Active(s) => Some(s),
        }
    }
}

/// Sampled stream points with their committed codes.
#[derive(Debug, Clone, PartialEq)]
pub struct ReservoirSample {
    features: Matrix,
    labels: Labels,
    priorities: Vec<f32>,
    codes: BinaryCodes,
    seen: u64,
}

impl ReservoirSample {
    /// Empty sample. Supervised samples keep one label row per point.
    pub fn empty(dim: usize, bits: usize, supervised: bool) -> Self {
        Self {
            features: Matrix::empty(dim),
            labels: if supervised {
                Labels::Tags(Vec::new())
            } else {
                Labels::Unlabeled
            },
            priorities: Vec::new(),
            codes: BinaryCodes::empty(bits),
            seen: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.features.rows()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn features(&self) -> &Matrix {
        &self.features
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub fn priorities(&self) -> &[f32] {
        &self.priorities
    }

    /// Codes under the committed projection.
    pub fn codes(&self) -> &BinaryCodes {
        &self.codes
    }

    /// Stream points offered to this sample so far.
    pub fn seen(&self) -> u64 {
        self.seen
    }

    /// Install codes computed under a newly committed projection.
    pub fn replace_codes(&mut self, codes: BinaryCodes) -> Result<()> {
        if codes.rows() != self.len() || codes.bits() != self.codes.bits() {
            return Err(OnlineError::DimensionMismatch {
                expected: self.len() * self.codes.bits(),
                actual: codes.rows() * codes.bits(),
            });
        }
        self.codes = codes;
        Ok(())
    }

    fn push(
        &mut self,
        row: &[f32],
        labels: &Labels,
        src: usize,
        priority: f32,
        batch_codes: &BinaryCodes,
    ) -> Result<()> {
        self.codes.push_row_from(batch_codes, src)?;
        self.features.push_row(row)?;
        self.labels.push(labels.get(src));
        self.priorities.push(priority);
        Ok(())
    }

    fn overwrite(
        &mut self,
        slot: usize,
        row: &[f32],
        labels: &Labels,
        src: usize,
        priority: f32,
        batch_codes: &BinaryCodes,
    ) -> Result<()> {
        self.codes.copy_row_from(slot, batch_codes, src)?;
        self.features.set_row(slot, row)?;
        if let (Labels::Tags(dst), Some(tags)) = (&mut self.labels, labels.get(src)) {
            dst[slot] = tags.clone();
        }
        self.priorities[slot] = priority;
        Ok(())
    }

    fn min_priority_slot(&self) -> Option<usize> {
        self.priorities
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
    }
}

/// Folds new stream batches into a reservoir sample.
pub trait ReservoirMaintainer {
    /// Offer a batch to the sample.
    ///
    /// Admitted points are encoded with `reference` (the committed projection).
    /// Returns the updated sample and the slot indices that changed.
    fn update(
        &mut self,
        sample: ReservoirSample,
        features: &Matrix,
        labels: &Labels,
        capacity: usize,
        reference: &Projection,
        unsupervised: bool,
    ) -> Result<(ReservoirSample, Vec<usize>)>;
}

/// Random-priority reservoir sampling.
///
/// Every offered point draws a uniform priority. Below capacity every point
/// is admitted; at capacity a point replaces the minimum-priority entry iff
/// its own priority is larger. The retained set is a uniform sample of the
/// stream (the `capacity` largest of i.i.d. uniform keys).
#[derive(Debug, Clone)]
pub struct PriorityReservoir {
    rng: StdRng,
}

impl PriorityReservoir {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl ReservoirMaintainer for PriorityReservoir {
    fn update(
        &mut self,
        mut sample: ReservoirSample,
        features: &Matrix,
        labels: &Labels,
        capacity: usize,
        reference: &Projection,
        unsupervised: bool,
    ) -> Result<(ReservoirSample, Vec<usize>)> {
        if reference.bits() != sample.codes.bits() {
            return Err(OnlineError::Reservoir(format!(
                "reference projection has {} bits, reservoir codes have {}",
                reference.bits(),
                sample.codes.bits()
            )));
        }
        if features.cols() != sample.features.cols() {
            return Err(OnlineError::DimensionMismatch {
                expected: sample.features.cols(),
                actual: features.cols(),
            });
        }
        if unsupervised && sample.labels.is_labeled() {
            return Err(OnlineError::Reservoir(
                "supervised reservoir updated in unsupervised mode".into(),
            ));
        }
        if sample.labels.is_labeled() && labels.len() != features.rows() {
            return Err(OnlineError::Reservoir(format!(
                "batch has {} feature rows but {} label rows",
                features.rows(),
                labels.len()
            )));
        }
        let no_labels = Labels::Unlabeled;
        let labels = if unsupervised { &no_labels } else { labels };

        let batch_codes = reference.encode(features)?;
        let mut changed = Vec::new();
        for (src, row) in features.iter_rows().enumerate() {
            sample.seen += 1;
            let priority: f32 = self.rng.random();
            if sample.len() < capacity {
                sample.push(row, labels, src, priority, &batch_codes)?;
                changed.push(sample.len() - 1);
            } else if let Some(slot) = sample.min_priority_slot() {
                if priority > sample.priorities[slot] {
                    sample.overwrite(slot, row, labels, src, priority, &batch_codes)?;
                    changed.push(slot);
                }
            }
        }
        changed.sort_unstable();
        changed.dedup();

        Ok((sample, changed))
    }
}

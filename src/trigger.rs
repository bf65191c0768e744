//! Trigger policies: when is a hash table rebuild worth it?
//!
//! Every `update_interval` streamed examples the trainer asks a
//! [`TriggerPolicy`] whether to commit the learner's current projection.
//! The policy sees the committed and current projections, the reservoir
//! (whose codes reflect the committed projection) and the reservoir's
//! candidate codes under the current projection.
//!
//! | Policy | Commits when |
//! |--------|--------------|
//! | [`AlwaysCommit`] | every check |
//! | [`NeverCommit`] | never |
//! | [`BitFlipTrigger`] | fraction of flipped reservoir bits ≥ threshold |
//! | [`MutualInfoTrigger`] | reservoir mutual-information gain > threshold |
//!
//! Policies are predicates: they must not mutate the reservoir or either
//! projection, which the `&`-only context enforces.

use crate::codes::BinaryCodes;
use crate::dataset::{shares_label, Labels};
use crate::error::{OnlineError, Result};
use crate::projection::Projection;
use crate::reservoir::Reservoir;

/// Everything a policy may look at when deciding.
#[derive(Debug, Clone, Copy)]
pub struct TriggerContext<'a> {
    /// 1-based iteration of the check.
    pub iteration: usize,
    /// Projection behind the published index.
    pub committed: &'a Projection,
    /// Learner's current projection.
    pub current: &'a Projection,
    /// Reservoir with codes under `committed`.
    pub reservoir: &'a Reservoir,
    /// Reservoir codes under `current`; `None` when the reservoir is disabled.
    pub candidate: Option<&'a BinaryCodes>,
}

impl TriggerContext<'_> {
    /// Whether the learner has moved since the last commit.
    pub fn projection_changed(&self) -> bool {
        self.committed != self.current
    }

    /// Committed and candidate reservoir codes, when both exist and are non-empty.
    pub fn reservoir_codes(&self) -> Option<(&BinaryCodes, &BinaryCodes)> {
        let sample = self.reservoir.sample()?;
        let candidate = self.candidate?;
        if sample.is_empty() {
            return None;
        }
        Some((sample.codes(), candidate))
    }
}

/// Decides whether to commit the current projection.
pub trait TriggerPolicy {
    /// Short name used in logs.
    fn name(&self) -> &str;

    fn decide(&self, ctx: &TriggerContext<'_>) -> Result<bool>;
}

/// Commit at every check.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysCommit;

impl TriggerPolicy for AlwaysCommit {
    fn name(&self) -> &str {
        "always"
    }

    fn decide(&self, _ctx: &TriggerContext<'_>) -> Result<bool> {
        Ok(true)
    }
}

/// Never commit; the initial index is served for the whole run.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCommit;

impl TriggerPolicy for NeverCommit {
    fn name(&self) -> &str {
        "never"
    }

    fn decide(&self, _ctx: &TriggerContext<'_>) -> Result<bool> {
        Ok(false)
    }
}

/// Commit when enough reservoir bits would flip.
///
/// Without a reservoir sample, commits iff the projection changed.
#[derive(Debug, Clone, Copy)]
pub struct BitFlipTrigger {
    threshold: f64,
}

impl BitFlipTrigger {
    /// `threshold` is a fraction of reservoir bits in `[0, 1]`.
    pub fn new(threshold: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(OnlineError::InvalidConfig(format!(
                "bit flip threshold {threshold} outside [0, 1]"
            )));
        }
        Ok(Self { threshold })
    }
}

impl TriggerPolicy for BitFlipTrigger {
    fn name(&self) -> &str {
        "bitflip"
    }

    fn decide(&self, ctx: &TriggerContext<'_>) -> Result<bool> {
        let Some((old, new)) = ctx.reservoir_codes() else {
            return Ok(ctx.projection_changed());
        };
        let flipped = old
            .differing_bits(new)
            .map_err(|e| OnlineError::Trigger(e.to_string()))?;
        let fraction = flipped as f64 / old.len_bits() as f64;
        Ok(fraction >= self.threshold)
    }
}

/// Commit when the candidate codes separate neighbors from non-neighbors
/// better than the committed codes, measured by mutual information between
/// Hamming distance and the same-label relation on the reservoir.
///
/// Needs a labelled reservoir with at least two points; otherwise commits
/// iff the projection changed.
#[derive(Debug, Clone, Copy)]
pub struct MutualInfoTrigger {
    threshold: f64,
}

impl MutualInfoTrigger {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl TriggerPolicy for MutualInfoTrigger {
    fn name(&self) -> &str {
        "mi"
    }

    fn decide(&self, ctx: &TriggerContext<'_>) -> Result<bool> {
        let labels = ctx.reservoir.sample().map(|s| s.labels());
        let (Some((old, new)), Some(labels)) = (ctx.reservoir_codes(), labels) else {
            return Ok(ctx.projection_changed());
        };
        if !labels.is_labeled() || old.rows() < 2 {
            return Ok(ctx.projection_changed());
        }
        let mi_old = mutual_information(old, labels)?;
        let mi_new = mutual_information(new, labels)?;
        Ok(mi_new - mi_old > self.threshold)
    }
}

/// Mean over points of `I(D; S)`, where `D` is the Hamming distance from the
/// point to every other point and `S` whether they share a label. In bits.
///
/// Points with no neighbor or no non-neighbor contribute zero.
pub fn mutual_information(codes: &BinaryCodes, labels: &Labels) -> Result<f64> {
    let n = codes.rows();
    if labels.len() != n {
        return Err(OnlineError::DimensionMismatch {
            expected: n,
            actual: labels.len(),
        });
    }
    if n < 2 {
        return Ok(0.0);
    }
    let bits = codes.bits();
    let mut pos = vec![0u32; bits + 1];
    let mut neg = vec![0u32; bits + 1];
    let mut total = 0.0f64;

    for q in 0..n {
        pos.iter_mut().for_each(|c| *c = 0);
        neg.iter_mut().for_each(|c| *c = 0);
        let Some(lq) = labels.get(q) else { continue };
        for r in (0..n).filter(|&r| r != q) {
            let d = codes.hamming(q, codes, r) as usize;
            match labels.get(r) {
                Some(lr) if shares_label(lq, lr) => pos[d] += 1,
                _ => neg[d] += 1,
            }
        }
        let np: u32 = pos.iter().sum();
        let nn: u32 = neg.iter().sum();
        if np == 0 || nn == 0 {
            continue;
        }
        let all = (np + nn) as f64;
        let joint: Vec<u32> = pos.iter().zip(&neg).map(|(a, b)| a + b).collect();
        let h_d = entropy(&joint, all);
        let h_pos = entropy(&pos, np as f64);
        let h_neg = entropy(&neg, nn as f64);
        total += h_d - (np as f64 / all) * h_pos - (nn as f64 / all) * h_neg;
    }

    Ok(total / n as f64)
}

fn entropy(counts: &[u32], total: f64) -> f64 {
    counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / total;
            -p * p.log2()
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::Matrix;
    use crate::reservoir::{PriorityReservoir, ReservoirMaintainer, ReservoirSample};

    fn projection(rows: Vec<Vec<f32>>) -> Projection {
        Projection::from_hyperplanes(Matrix::from_rows(rows).unwrap()).unwrap()
    }

    fn filled_reservoir(
        reference: &Projection,
        features: Vec<Vec<f32>>,
        classes: &[u32],
    ) -> Reservoir {
        let features = Matrix::from_rows(features).unwrap();
        let labels = Labels::from_classes(classes);
        let (sample, _) = PriorityReservoir::new(0)
            .update(
                ReservoirSample::empty(features.cols(), reference.bits(), true),
                &features,
                &labels,
                features.rows(),
                reference,
                false,
            )
            .unwrap();
        Reservoir::Active(sample)
    }

    #[test]
    fn test_always_and_never() {
        let w = Projection::gaussian(2, 2, 0).unwrap();
        let ctx = TriggerContext {
            iteration: 1,
            committed: &w,
            current: &w,
            reservoir: &Reservoir::Disabled,
            candidate: None,
        };
        assert!(AlwaysCommit.decide(&ctx).unwrap());
        assert!(!NeverCommit.decide(&ctx).unwrap());
    }

    #[test]
    fn test_bitflip_without_reservoir_follows_projection_change() {
        let a = Projection::gaussian(2, 2, 0).unwrap();
        let b = Projection::gaussian(2, 2, 1).unwrap();
        let trigger = BitFlipTrigger::new(0.5).unwrap();
        let mut ctx = TriggerContext {
            iteration: 1,
            committed: &a,
            current: &a,
            reservoir: &Reservoir::Disabled,
            candidate: None,
        };
        assert!(!trigger.decide(&ctx).unwrap());
        ctx.current = &b;
        assert!(trigger.decide(&ctx).unwrap());
    }

    #[test]
    fn test_bitflip_threshold() {
        let committed = projection(vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        let current = projection(vec![vec![-1.0, 0.0], vec![0.0, 1.0]]);
        let reservoir = filled_reservoir(
            &committed,
            vec![vec![1.0, 1.0], vec![-1.0, 1.0]],
            &[0, 1],
        );
        let candidate = current.encode(reservoir.sample().unwrap().features()).unwrap();
        let ctx = TriggerContext {
            iteration: 4,
            committed: &committed,
            current: &current,
            reservoir: &reservoir,
            candidate: Some(&candidate),
        };
        // first bit flips on both rows: 2 of 4 bits
        assert!(BitFlipTrigger::new(0.5).unwrap().decide(&ctx).unwrap());
        assert!(!BitFlipTrigger::new(0.75).unwrap().decide(&ctx).unwrap());
        assert!(BitFlipTrigger::new(1.5).is_err());
    }

    #[test]
    fn test_mutual_information_perfect_separation() {
        // two classes, codes identical within a class and opposite across
        let codes = BinaryCodes::from_bools(&[
            vec![true, true],
            vec![true, true],
            vec![false, false],
            vec![false, false],
        ])
        .unwrap();
        let labels = Labels::from_classes(&[0, 0, 1, 1]);
        let mi = mutual_information(&codes, &labels).unwrap();
        // each query: 1 neighbor at d=0, 2 non-neighbors at d=2 -> I = H(1/3)
        let (p, q) = (1.0f64 / 3.0, 2.0f64 / 3.0);
        let expected = -p * p.log2() - q * q.log2();
        assert!((mi - expected).abs() < 1e-9);

        let uninformative = BinaryCodes::zeros(4, 2);
        assert!(mutual_information(&uninformative, &labels).unwrap().abs() < 1e-12);
    }

    #[test]
    fn test_mi_trigger_prefers_better_codes() {
        let features = vec![vec![1.0, 1.0], vec![1.0, 0.9], vec![-1.0, 1.0], vec![-1.0, 0.9]];
        // committed ignores the class-separating first coordinate
        let committed = projection(vec![vec![0.0, 1.0]]);
        let current = projection(vec![vec![1.0, 0.0]]);
        let reservoir = filled_reservoir(&committed, features, &[0, 0, 1, 1]);
        let candidate = current.encode(reservoir.sample().unwrap().features()).unwrap();
        let ctx = TriggerContext {
            iteration: 2,
            committed: &committed,
            current: &current,
            reservoir: &reservoir,
            candidate: Some(&candidate),
        };
        assert!(MutualInfoTrigger::new(0.0).decide(&ctx).unwrap());
        assert!(!MutualInfoTrigger::new(10.0).decide(&ctx).unwrap());
    }
}

//! The published hash table.
//!
//! [`PublishedIndex`] owns the database codes together with the projection
//! that produced them, so the pair `(H, W_snapshot)` can only be replaced as
//! a unit: `codes == sign(X · committed)` holds for every value of this type
//! built through [`PublishedIndex::build`].

use crate::codes::BinaryCodes;
use crate::error::{OnlineError, Result};
use crate::matrix::Matrix;
use crate::projection::Projection;
use serde::{Deserialize, Serialize};

/// Database codes and the committed projection they were computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PublishedIndexRepr")]
pub struct PublishedIndex {
    committed: Projection,
    codes: BinaryCodes,
}

#[derive(Deserialize)]
struct PublishedIndexRepr {
    committed: Projection,
    codes: BinaryCodes,
}

impl TryFrom<PublishedIndexRepr> for PublishedIndex {
    type Error = OnlineError;

    fn try_from(repr: PublishedIndexRepr) -> Result<Self> {
        if repr.codes.bits() != repr.committed.bits() {
            return Err(OnlineError::DimensionMismatch {
                expected: repr.committed.bits(),
                actual: repr.codes.bits(),
            });
        }
        Ok(Self {
            committed: repr.committed,
            codes: repr.codes,
        })
    }
}

impl PublishedIndex {
    /// Recompute the full table for `committed`.
    ///
    /// Cost is O(N · D · B); this is the operation the trigger policy exists
    /// to ration.
    pub fn build(features: &Matrix, committed: Projection) -> Result<Self> {
        let codes = committed.encode(features)?;
        Ok(Self { committed, codes })
    }

    pub fn committed(&self) -> &Projection {
        &self.committed
    }

    pub fn codes(&self) -> &BinaryCodes {
        &self.codes
    }

    /// Number of code bits a rebuild rewrites (N × B).
    pub fn size_bits(&self) -> u64 {
        self.codes.len_bits()
    }

    /// Whether the stored codes are exactly `sign(features · committed)`.
    pub fn is_consistent_with(&self, features: &Matrix) -> Result<bool> {
        Ok(self.committed.encode(features)? == self.codes)
    }

    pub fn into_parts(self) -> (Projection, BinaryCodes) {
        (self.committed, self.codes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_is_consistent() {
        let x = Matrix::from_rows(vec![vec![1.0, -2.0], vec![0.5, 0.5], vec![-1.0, 0.0]]).unwrap();
        let w = Projection::gaussian(2, 5, 42).unwrap();
        let index = PublishedIndex::build(&x, w.clone()).unwrap();
        assert_eq!(index.size_bits(), 15);
        assert_eq!(index.committed(), &w);
        assert!(index.is_consistent_with(&x).unwrap());
    }

    #[test]
    fn test_stale_projection_detected() {
        let x = Matrix::from_rows(vec![vec![1.0, 1.0], vec![-1.0, 1.0]]).unwrap();
        let w = hyperplane(&[1.0, 0.0]);
        let index = PublishedIndex::build(&x, w).unwrap();
        let flipped = hyperplane(&[-1.0, 0.0]);
        assert_ne!(flipped.encode(&x).unwrap(), *index.codes());
    }

    fn hyperplane(normal: &[f32]) -> Projection {
        Projection::from_hyperplanes(Matrix::from_rows(vec![normal.to_vec()]).unwrap()).unwrap()
    }

    #[test]
    fn test_deserialize_rejects_bit_count_mismatch() {
        let x = Matrix::from_rows(vec![vec![1.0, 1.0], vec![-1.0, 1.0]]).unwrap();
        let index = PublishedIndex::build(&x, Projection::gaussian(2, 3, 1).unwrap()).unwrap();
        let json = serde_json::to_string(&index).unwrap();
        assert_eq!(serde_json::from_str::<PublishedIndex>(&json).unwrap(), index);

        let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
        value["committed"] = serde_json::to_value(hyperplane(&[1.0, 0.0])).unwrap();
        assert!(serde_json::from_value::<PublishedIndex>(value).is_err());
    }
}

//! Linear hash projections.
//!
//! A projection maps a D-dimensional feature row to B real-valued scores;
//! the binary code is the sign pattern of those scores (bit = 1 iff score > 0).
//!
//! Conceptually this is the D×B matrix `W` in `sign(X·W)`. It is stored
//! transposed, one contiguous D-vector (hyperplane normal) per code bit, so
//! that scoring a row is B contiguous dot products.

use crate::codes::BinaryCodes;
use crate::dataset::gaussian;
use crate::error::{OnlineError, Result};
use crate::matrix::Matrix;
use crate::simd::dot;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// B hyperplanes in D dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ProjectionRepr")]
pub struct Projection {
    hyperplanes: Matrix,
}

#[derive(Deserialize)]
struct ProjectionRepr {
    hyperplanes: Matrix,
}

impl TryFrom<ProjectionRepr> for Projection {
    type Error = OnlineError;

    fn try_from(repr: ProjectionRepr) -> Result<Self> {
        Self::from_hyperplanes(repr.hyperplanes)
    }
}

impl Projection {
    /// Wrap a B×D matrix of hyperplane normals.
    pub fn from_hyperplanes(hyperplanes: Matrix) -> Result<Self> {
        if hyperplanes.rows() == 0 {
            return Err(OnlineError::InvalidConfig("projection needs at least one bit".into()));
        }
        Ok(Self { hyperplanes })
    }

    /// Random-hyperplane (SimHash-style) projection with standard normal entries.
    pub fn gaussian(dim: usize, bits: usize, seed: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        let data = (0..dim * bits).map(|_| gaussian(&mut rng)).collect();
        Self::from_hyperplanes(Matrix::new(bits, dim, data)?)
    }

    /// Input dimension (D).
    #[inline]
    pub fn dim(&self) -> usize {
        self.hyperplanes.cols()
    }

    /// Code length (B).
    #[inline]
    pub fn bits(&self) -> usize {
        self.hyperplanes.rows()
    }

    #[inline]
    pub fn hyperplane(&self, bit: usize) -> &[f32] {
        self.hyperplanes.row(bit)
    }

    #[inline]
    pub fn hyperplane_mut(&mut self, bit: usize) -> &mut [f32] {
        self.hyperplanes.row_mut(bit)
    }

    /// Real-valued scores of one feature row, written into `out` (len B).
    pub fn scores_into(&self, row: &[f32], out: &mut [f32]) {
        for (b, o) in out.iter_mut().enumerate() {
            *o = dot(row, self.hyperplane(b));
        }
    }

    /// Real-valued scores of one feature row.
    pub fn scores(&self, row: &[f32]) -> Vec<f32> {
        let mut out = vec![0.0; self.bits()];
        self.scores_into(row, &mut out);
        out
    }

    /// Binary codes of every row of `features`: `sign(features · W) > 0`.
    pub fn encode(&self, features: &Matrix) -> Result<BinaryCodes> {
        if features.cols() != self.dim() {
            return Err(OnlineError::DimensionMismatch {
                expected: self.dim(),
                actual: features.cols(),
            });
        }
        let mut codes = BinaryCodes::zeros(features.rows(), self.bits());
        let mut scratch = vec![0.0f32; self.bits()];
        for (i, row) in features.iter_rows().enumerate() {
            self.scores_into(row, &mut scratch);
            codes.set_row_from_scores(i, &scratch);
        }
        Ok(codes)
    }
}

//! Dense row-major `f32` matrix.
//!
//! Feature matrices are stored SoA-style in one contiguous buffer; row `i`
//! occupies `data[i * cols..(i + 1) * cols]`.

use crate::error::{OnlineError, Result};
use serde::{Deserialize, Serialize};

/// Row-major matrix of `f32`.
///
/// Deserialization goes through [`Matrix::new`], so a decoded matrix always
/// has `data.len() == rows * cols`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "MatrixRepr")]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

#[derive(Deserialize)]
struct MatrixRepr {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl TryFrom<MatrixRepr> for Matrix {
    type Error = OnlineError;

    fn try_from(repr: MatrixRepr) -> Result<Self> {
        let Some(expected) = repr.rows.checked_mul(repr.cols) else {
            return Err(OnlineError::InvalidConfig(format!(
                "matrix shape {}x{} overflows",
                repr.rows, repr.cols
            )));
        };
        if repr.data.len() != expected {
            return Err(OnlineError::DimensionMismatch {
                expected,
                actual: repr.data.len(),
            });
        }
        Ok(Self {
            rows: repr.rows,
            cols: repr.cols,
            data: repr.data,
        })
    }
}

impl Matrix {
    /// Wrap a flat buffer. `data.len()` must equal `rows * cols`.
    pub fn new(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(OnlineError::DimensionMismatch {
                expected: rows * cols,
                actual: data.len(),
            });
        }
        Ok(Self { rows, cols, data })
    }

    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// A matrix with no rows but a fixed column count.
    pub fn empty(cols: usize) -> Self {
        Self {
            rows: 0,
            cols,
            data: Vec::new(),
        }
    }

    /// Build from nested rows. All rows must share the first row's length.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for row in &rows {
            if row.len() != cols {
                return Err(OnlineError::DimensionMismatch {
                    expected: cols,
                    actual: row.len(),
                });
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            data,
        })
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    #[inline]
    pub fn row(&self, i: usize) -> &[f32] {
        let start = i * self.cols;
        &self.data[start..start + self.cols]
    }

    #[inline]
    pub fn row_mut(&mut self, i: usize) -> &mut [f32] {
        let start = i * self.cols;
        &mut self.data[start..start + self.cols]
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
        // chunks_exact panics on zero; a zero-width matrix has no row data to yield
        let width = self.cols.max(1);
        self.data
            .chunks_exact(width)
            .take(if self.cols == 0 { 0 } else { self.rows })
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Gather the given rows (in order, duplicates allowed) into a new matrix.
    pub fn select_rows(&self, indices: &[usize]) -> Result<Self> {
        let mut data = Vec::with_capacity(indices.len() * self.cols);
        for &i in indices {
            if i >= self.rows {
                return Err(OnlineError::InvalidConfig(format!(
                    "row index {i} out of bounds for {} rows",
                    self.rows
                )));
            }
            data.extend_from_slice(self.row(i));
        }
        Ok(Self {
            rows: indices.len(),
            cols: self.cols,
            data,
        })
    }

    /// Append one row.
    pub fn push_row(&mut self, row: &[f32]) -> Result<()> {
        if row.len() != self.cols {
            return Err(OnlineError::DimensionMismatch {
                expected: self.cols,
                actual: row.len(),
            });
        }
        self.data.extend_from_slice(row);
        self.rows += 1;
        Ok(())
    }

    /// Overwrite row `i`.
    pub fn set_row(&mut self, i: usize, row: &[f32]) -> Result<()> {
        if row.len() != self.cols {
            return Err(OnlineError::DimensionMismatch {
                expected: self.cols,
                actual: row.len(),
            });
        }
        self.row_mut(i).copy_from_slice(row);
        Ok(())
    }
}

//! Bit-packed binary code matrices.
//!
//! An N×B code matrix stores each row as `ceil(B / 64)` little-endian `u64`
//! words; bit `b` of row `i` lives in word `b / 64`, position `b % 64`.
//! Unused high bits of the last word are always zero, so word-wise equality
//! and XOR/popcount Hamming distance are exact.

use crate::error::{OnlineError, Result};
use crate::simd::hamming_words;
use serde::{Deserialize, Serialize};

const WORD_BITS: usize = 64;

/// N×B binary code matrix.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "BinaryCodesRepr")]
pub struct BinaryCodes {
    rows: usize,
    bits: usize,
    words_per_row: usize,
    words: Vec<u64>,
}

#[derive(Deserialize)]
struct BinaryCodesRepr {
    rows: usize,
    bits: usize,
    words_per_row: usize,
    words: Vec<u64>,
}

impl TryFrom<BinaryCodesRepr> for BinaryCodes {
    type Error = OnlineError;

    /// Rejects decoded codes whose word layout does not match `rows × bits`
    /// or whose padding bits are set.
    fn try_from(repr: BinaryCodesRepr) -> Result<Self> {
        let words_per_row = repr.bits.div_ceil(WORD_BITS);
        if repr.words_per_row != words_per_row {
            return Err(OnlineError::DimensionMismatch {
                expected: words_per_row,
                actual: repr.words_per_row,
            });
        }
        let Some(expected) = repr.rows.checked_mul(words_per_row) else {
            return Err(OnlineError::InvalidConfig(format!(
                "code shape {}x{} overflows",
                repr.rows, repr.bits
            )));
        };
        if repr.words.len() != expected {
            return Err(OnlineError::DimensionMismatch {
                expected,
                actual: repr.words.len(),
            });
        }
        let tail = repr.bits % WORD_BITS;
        if tail != 0 {
            let padding = !0u64 << tail;
            let dirty = repr
                .words
                .chunks_exact(words_per_row)
                .any(|row| row[words_per_row - 1] & padding != 0);
            if dirty {
                return Err(OnlineError::InvalidConfig(
                    "code padding bits must be zero".into(),
                ));
            }
        }
        Ok(Self {
            rows: repr.rows,
            bits: repr.bits,
            words_per_row,
            words: repr.words,
        })
    }
}

impl BinaryCodes {
    /// All-zero codes.
    pub fn zeros(rows: usize, bits: usize) -> Self {
        let words_per_row = bits.div_ceil(WORD_BITS);
        Self {
            rows,
            bits,
            words_per_row,
            words: vec![0; rows * words_per_row],
        }
    }

    /// Codes with no rows but a fixed code length.
    pub fn empty(bits: usize) -> Self {
        Self::zeros(0, bits)
    }

    /// Build from explicit bit rows.
    pub fn from_bools(rows: &[Vec<bool>]) -> Result<Self> {
        let bits = rows.first().map_or(0, Vec::len);
        let mut codes = Self::zeros(rows.len(), bits);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != bits {
                return Err(OnlineError::DimensionMismatch {
                    expected: bits,
                    actual: row.len(),
                });
            }
            for (b, &bit) in row.iter().enumerate() {
                codes.set(i, b, bit);
            }
        }
        Ok(codes)
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn bits(&self) -> usize {
        self.bits
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Total number of code bits (`rows * bits`).
    #[inline]
    pub fn len_bits(&self) -> u64 {
        (self.rows * self.bits) as u64
    }

    #[inline]
    pub fn row_words(&self, i: usize) -> &[u64] {
        let start = i * self.words_per_row;
        &self.words[start..start + self.words_per_row]
    }

    #[inline]
    pub fn get(&self, row: usize, bit: usize) -> bool {
        let w = self.words[row * self.words_per_row + bit / WORD_BITS];
        (w >> (bit % WORD_BITS)) & 1 == 1
    }

    #[inline]
    pub fn set(&mut self, row: usize, bit: usize, value: bool) {
        let w = &mut self.words[row * self.words_per_row + bit / WORD_BITS];
        let mask = 1u64 << (bit % WORD_BITS);
        if value {
            *w |= mask;
        } else {
            *w &= !mask;
        }
    }

    /// Overwrite row `i` from its `bits` real-valued scores.
    pub(crate) fn set_row_from_scores(&mut self, i: usize, scores: &[f32]) {
        let start = i * self.words_per_row;
        let row = &mut self.words[start..start + self.words_per_row];
        row.iter_mut().for_each(|w| *w = 0);
        for (b, &s) in scores.iter().enumerate() {
            if s > 0.0 {
                row[b / WORD_BITS] |= 1u64 << (b % WORD_BITS);
            }
        }
    }

    /// Copy row `src_row` of `src` into row `dst_row` of `self`.
    pub fn copy_row_from(
        &mut self,
        dst_row: usize,
        src: &BinaryCodes,
        src_row: usize,
    ) -> Result<()> {
        self.check_row_source(src, src_row)?;
        if dst_row >= self.rows {
            return Err(OnlineError::InvalidConfig(format!(
                "code row {dst_row} out of bounds for {} rows",
                self.rows
            )));
        }
        let start = dst_row * self.words_per_row;
        self.words[start..start + self.words_per_row].copy_from_slice(src.row_words(src_row));
        Ok(())
    }

    /// Append one row copied from another code matrix.
    pub fn push_row_from(&mut self, src: &BinaryCodes, src_row: usize) -> Result<()> {
        self.check_row_source(src, src_row)?;
        self.words.extend_from_slice(src.row_words(src_row));
        self.rows += 1;
        Ok(())
    }

    fn check_row_source(&self, src: &BinaryCodes, src_row: usize) -> Result<()> {
        if src.bits != self.bits {
            return Err(OnlineError::DimensionMismatch {
                expected: self.bits,
                actual: src.bits,
            });
        }
        if src_row >= src.rows {
            return Err(OnlineError::InvalidConfig(format!(
                "code row {src_row} out of bounds for {} rows",
                src.rows
            )));
        }
        Ok(())
    }

    /// Hamming distance between row `i` of `self` and row `j` of `other`.
    #[inline]
    pub fn hamming(&self, i: usize, other: &BinaryCodes, j: usize) -> u32 {
        hamming_words(self.row_words(i), other.row_words(j))
    }

    /// Number of positions where two equally shaped code matrices differ.
    pub fn differing_bits(&self, other: &BinaryCodes) -> Result<u64> {
        if self.rows != other.rows || self.bits != other.bits {
            return Err(OnlineError::DimensionMismatch {
                expected: self.rows * self.bits,
                actual: other.rows * other.bits,
            });
        }
        Ok(hamming_words(&self.words, &other.words) as u64)
    }

    /// Unpack row `i` into bools (for inspection and tests).
    pub fn row_bools(&self, i: usize) -> Vec<bool> {
        (0..self.bits).map(|b| self.get(i, b)).collect()
    }
}

//! Block-wise FP8 quantization of f32 matrices
//!
//! Produces operands in the layout the engine consumes:
//!
//! - **A** (`K x M`): one scale per (K-block, column), `ScaleGranularity::PerColumnBlock`
//! - **B** (`K x N`): one scale per 128x128 tile, `ScaleGranularity::Tile`
//!
//! Scales are symmetric: `scale = max(|block|) / 240`, so the largest magnitude
//! in each block maps to the FP8 maximum. An all-zero block gets scale `1.0`.

use crate::error::{EscalarError, Result};
use crate::format::{Fp8E4M3Fnuz, FP8_MAX};
use crate::matrix::{Fp8Matrix, ScaleMatrix};
use crate::shape::BLOCK;

/// Shape of the scale grid relative to the operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleGranularity {
    /// One scale per `BLOCK` rows per column (the A operand)
    PerColumnBlock,
    /// One scale per `BLOCK x BLOCK` tile (the B operand)
    Tile,
}

impl ScaleGranularity {
    /// Scale grid dimensions for a `rows x cols` operand
    #[must_use]
    pub fn scale_dims(self, rows: usize, cols: usize) -> (usize, usize) {
        match self {
            Self::PerColumnBlock => (rows / BLOCK, cols),
            Self::Tile => (rows / BLOCK, cols / BLOCK),
        }
    }

    #[inline]
    fn scale_index(self, r: usize, c: usize, cols: usize) -> usize {
        match self {
            Self::PerColumnBlock => (r / BLOCK) * cols + c,
            Self::Tile => (r / BLOCK) * (cols / BLOCK) + c / BLOCK,
        }
    }

    fn check_dims(self, rows: usize, cols: usize) -> Result<()> {
        if rows == 0 || cols == 0 {
            return Err(EscalarError::InvalidShape {
                reason: format!("Operand dimensions must be positive, got {rows}x{cols}"),
            });
        }
        if rows % BLOCK != 0 {
            return Err(EscalarError::MisalignedDimension {
                axis: "K",
                value: rows,
                block: BLOCK,
            });
        }
        if self == Self::Tile && cols % BLOCK != 0 {
            return Err(EscalarError::MisalignedDimension {
                axis: "N",
                value: cols,
                block: BLOCK,
            });
        }
        Ok(())
    }
}

/// An owned FP8 operand with its scale grid
#[derive(Debug, Clone, PartialEq)]
pub struct BlockQuantized {
    data: Vec<Fp8E4M3Fnuz>,
    scales: Vec<f32>,
    rows: usize,
    cols: usize,
    granularity: ScaleGranularity,
}

impl BlockQuantized {
    /// Assemble from already-quantized parts
    ///
    /// # Errors
    ///
    /// Fails on misaligned dimensions or buffer lengths that do not match.
    pub fn from_parts(
        data: Vec<Fp8E4M3Fnuz>,
        scales: Vec<f32>,
        rows: usize,
        cols: usize,
        granularity: ScaleGranularity,
    ) -> Result<Self> {
        granularity.check_dims(rows, cols)?;
        if data.len() != rows * cols {
            return Err(EscalarError::InvalidShape {
                reason: format!(
                    "FP8 data length {} doesn't match {rows}x{cols}",
                    data.len()
                ),
            });
        }
        let (scale_rows, scale_cols) = granularity.scale_dims(rows, cols);
        if scales.len() != scale_rows * scale_cols {
            return Err(EscalarError::InvalidShape {
                reason: format!(
                    "Scale length {} doesn't match grid {scale_rows}x{scale_cols}",
                    scales.len()
                ),
            });
        }
        Ok(Self {
            data,
            scales,
            rows,
            cols,
            granularity,
        })
    }

    /// FP8 operand view
    #[must_use]
    pub fn operand(&self) -> Fp8Matrix<'_> {
        Fp8Matrix::new(&self.data, self.rows, self.cols)
    }

    /// Scale grid view
    #[must_use]
    pub fn scales(&self) -> ScaleMatrix<'_> {
        let (scale_rows, scale_cols) = self.granularity.scale_dims(self.rows, self.cols);
        ScaleMatrix::new(&self.scales, scale_rows, scale_cols)
    }

    /// Mutable scale buffer (row-major grid)
    pub fn scales_mut(&mut self) -> &mut [f32] {
        &mut self.scales
    }

    /// Mutable FP8 buffer (row-major)
    pub fn data_mut(&mut self) -> &mut [Fp8E4M3Fnuz] {
        &mut self.data
    }

    /// Operand rows (K)
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Operand columns (M or N)
    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Scale layout
    #[must_use]
    pub fn granularity(&self) -> ScaleGranularity {
        self.granularity
    }

    /// Reconstruct `fp8 * scale` for every element
    #[must_use]
    pub fn dequantize(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.data.len());
        for r in 0..self.rows {
            for c in 0..self.cols {
                let scale = self.scales[self.granularity.scale_index(r, c, self.cols)];
                out.push(self.data[r * self.cols + c].to_f32() * scale);
            }
        }
        out
    }
}

/// Quantize an A-style `k x m` matrix (per-column K-block scales)
///
/// # Errors
///
/// Fails if `values.len() != k * m`, `k` is not block-aligned, or any value is
/// not finite.
pub fn quantize_lhs(values: &[f32], k: usize, m: usize) -> Result<BlockQuantized> {
    quantize_blockwise(values, k, m, ScaleGranularity::PerColumnBlock)
}

/// Quantize a B-style `k x n` matrix (128x128 tile scales)
///
/// # Errors
///
/// Fails if `values.len() != k * n`, `k` or `n` is not block-aligned, or any
/// value is not finite.
pub fn quantize_rhs(values: &[f32], k: usize, n: usize) -> Result<BlockQuantized> {
    quantize_blockwise(values, k, n, ScaleGranularity::Tile)
}

/// Quantize with an amax-derived scale per block
///
/// # Errors
///
/// See [`quantize_lhs`] / [`quantize_rhs`].
pub fn quantize_blockwise(
    values: &[f32],
    rows: usize,
    cols: usize,
    granularity: ScaleGranularity,
) -> Result<BlockQuantized> {
    check_values(values, rows, cols, granularity)?;

    let (scale_rows, scale_cols) = granularity.scale_dims(rows, cols);
    let mut amax = vec![0.0f32; scale_rows * scale_cols];
    for r in 0..rows {
        for c in 0..cols {
            let slot = &mut amax[granularity.scale_index(r, c, cols)];
            *slot = slot.max(values[r * cols + c].abs());
        }
    }

    let scales: Vec<f32> = amax
        .iter()
        .map(|&a| if a > 0.0 { a / FP8_MAX } else { 1.0 })
        .collect();

    let mut data = Vec::with_capacity(values.len());
    for r in 0..rows {
        for c in 0..cols {
            let scale = scales[granularity.scale_index(r, c, cols)];
            data.push(Fp8E4M3Fnuz::from_f32(values[r * cols + c] / scale));
        }
    }

    Ok(BlockQuantized {
        data,
        scales,
        rows,
        cols,
        granularity,
    })
}

/// Cast straight to FP8 with every scale set to `1.0`
///
/// Magnitudes beyond 240 saturate.
///
/// # Errors
///
/// Same conditions as [`quantize_blockwise`].
pub fn quantize_with_unit_scales(
    values: &[f32],
    rows: usize,
    cols: usize,
    granularity: ScaleGranularity,
) -> Result<BlockQuantized> {
    check_values(values, rows, cols, granularity)?;
    let (scale_rows, scale_cols) = granularity.scale_dims(rows, cols);
    Ok(BlockQuantized {
        data: values.iter().map(|&v| Fp8E4M3Fnuz::from_f32(v)).collect(),
        scales: vec![1.0; scale_rows * scale_cols],
        rows,
        cols,
        granularity,
    })
}

fn check_values(
    values: &[f32],
    rows: usize,
    cols: usize,
    granularity: ScaleGranularity,
) -> Result<()> {
    granularity.check_dims(rows, cols)?;
    if values.len() != rows * cols {
        return Err(EscalarError::InvalidShape {
            reason: format!(
                "Value length {} doesn't match {rows}x{cols}",
                values.len()
            ),
        });
    }
    if let Some(index) = values.iter().position(|v| !v.is_finite()) {
        return Err(EscalarError::NonFiniteInput {
            buffer: "values",
            index,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_dims() {
        assert_eq!(ScaleGranularity::PerColumnBlock.scale_dims(256, 64), (2, 64));
        assert_eq!(ScaleGranularity::Tile.scale_dims(256, 384), (2, 3));
    }

    #[test]
    fn test_quantize_lhs_scale_per_column_block() {
        let (k, m) = (256, 2);
        let mut values = vec![0.0f32; k * m];
        // Column 0: block 0 amax 48, block 1 amax 2.4
        values[5 * m] = 48.0;
        values[200 * m] = -2.4;
        // Column 1 stays zero -> unit scales
        let q = quantize_lhs(&values, k, m).unwrap();
        let scales = q.scales();
        assert_eq!((scales.rows(), scales.cols()), (2, 2));
        assert!((scales.get(0, 0) - 48.0 / 240.0).abs() < 1e-7);
        assert!((scales.get(1, 0) - 2.4 / 240.0).abs() < 1e-7);
        assert_eq!(scales.get(0, 1), 1.0);
        assert_eq!(scales.get(1, 1), 1.0);
        // The block maximum lands on the FP8 maximum
        assert_eq!(q.operand().get(5, 0), Fp8E4M3Fnuz::MAX);
        assert_eq!(q.operand().get(200, 0), Fp8E4M3Fnuz::MIN);
    }

    #[test]
    fn test_quantize_rhs_scale_per_tile() {
        let (k, n) = (128, 256);
        let values: Vec<f32> = (0..k * n)
            .map(|i| if i % n < 128 { 1.0 } else { 10.0 })
            .collect();
        let q = quantize_rhs(&values, k, n).unwrap();
        assert_eq!(q.scales().data(), &[1.0 / 240.0, 10.0 / 240.0]);
        let deq = q.dequantize();
        for (orig, back) in values.iter().zip(&deq) {
            assert!((orig - back).abs() <= orig.abs() * 1e-6, "{orig} vs {back}");
        }
    }

    #[test]
    fn test_quantize_error_within_fp8_step() {
        let (k, m) = (128, 4);
        let values: Vec<f32> = (0..k * m).map(|i| ((i * 37 % 101) as f32 - 50.0) * 0.13).collect();
        let q = quantize_lhs(&values, k, m).unwrap();
        let deq = q.dequantize();
        for c in 0..m {
            let scale = q.scales().get(0, c);
            for r in 0..k {
                let err = (values[r * m + c] - deq[r * m + c]).abs();
                // Half an ulp at the top binade of E4M3 is 8 (in units of scale)
                assert!(err <= 8.0 * scale + 1e-6, "err {err} at ({r},{c})");
            }
        }
    }

    #[test]
    fn test_quantize_rejects_misaligned() {
        assert!(matches!(
            quantize_lhs(&[0.0; 100 * 2], 100, 2),
            Err(EscalarError::MisalignedDimension { axis: "K", .. })
        ));
        assert!(matches!(
            quantize_rhs(&vec![0.0; 128 * 100], 128, 100),
            Err(EscalarError::MisalignedDimension { axis: "N", .. })
        ));
        // Per-column granularity has no requirement on the column count
        assert!(quantize_lhs(&vec![0.0; 128 * 3], 128, 3).is_ok());
    }

    #[test]
    fn test_quantize_rejects_length_mismatch_and_non_finite() {
        assert!(matches!(
            quantize_lhs(&[0.0; 10], 128, 1),
            Err(EscalarError::InvalidShape { .. })
        ));
        let mut values = vec![1.0f32; 128];
        values[17] = f32::NAN;
        assert_eq!(
            quantize_lhs(&values, 128, 1).unwrap_err(),
            EscalarError::NonFiniteInput {
                buffer: "values",
                index: 17
            }
        );
    }

    #[test]
    fn test_unit_scales() {
        let values = vec![1.0f32; 128 * 128];
        let q = quantize_with_unit_scales(&values, 128, 128, ScaleGranularity::Tile).unwrap();
        assert_eq!(q.scales().data(), &[1.0]);
        assert!(q.operand().data().iter().all(|&v| v == Fp8E4M3Fnuz::ONE));
    }

    #[test]
    fn test_from_parts_validates_lengths() {
        let data = vec![Fp8E4M3Fnuz::ONE; 128];
        assert!(BlockQuantized::from_parts(
            data.clone(),
            vec![1.0],
            128,
            1,
            ScaleGranularity::PerColumnBlock
        )
        .is_ok());
        assert!(BlockQuantized::from_parts(
            data,
            vec![1.0, 1.0],
            128,
            1,
            ScaleGranularity::PerColumnBlock
        )
        .is_err());
    }
}

//! Quantization-aware tiled kernel
//!
//! The output is cut into row bands of `tile_m` rows. A band is a contiguous
//! `tile_m * N` slice of C, so bands are the unit of parallel work and no two
//! work units ever touch the same element. Inside a band, column tiles of
//! `tile_n` are processed one after another, and inside a tile the K dimension
//! is walked in chunks of exactly [`BLOCK`] rows.
//!
//! Because a chunk never straddles a quantization block, every chunk has one A
//! scale per output row and one B scale per output column. The chunk's raw FP8
//! products are summed first and the scale product is applied once:
//!
//! ```text
//! acc[i][j] += (sum_kk a[kk][i] * b[kk][j]) * (sa[kb][i] * sb[kb][j / BLOCK])
//! ```
//!
//! The raw chunk sum is exact in f64. An E4M3FNUZ product has at most 8
//! significant bits and is a multiple of `2^-20` no larger than `2^16`; 128 of
//! them sum to less than `2^23`, so every partial sum fits in 43 bits. The
//! result is independent of summation order, and the only rounding per chunk
//! is the scale multiply and the running f64 add, both in a fixed order.

use half::bf16;

use crate::format::{bf16_from_f64, Fp8E4M3Fnuz};
use crate::shape::{GemmShape, BLOCK};

/// Borrowed, already validated inputs
#[derive(Debug, Clone, Copy)]
pub(crate) struct Operands<'a> {
    pub a: &'a [Fp8E4M3Fnuz],
    pub b: &'a [Fp8E4M3Fnuz],
    pub a_scale: &'a [f32],
    pub b_scale: &'a [f32],
    pub shape: GemmShape,
}

/// Tile extents in output elements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Tiling {
    pub tile_m: usize,
    pub tile_n: usize,
}

/// Per-worker buffers, reused across the tiles of one or more bands
#[derive(Debug)]
pub(crate) struct TileScratch {
    a_panel: Vec<f64>,
    b_panel: Vec<f64>,
    chunk: Vec<f64>,
    acc: Vec<f64>,
    row_scale: Vec<f64>,
    col_scale: Vec<f64>,
}

impl TileScratch {
    pub(crate) fn new(tiling: Tiling, n: usize) -> Self {
        let tile_n = tiling.tile_n.min(n);
        Self {
            a_panel: vec![0.0; BLOCK * tiling.tile_m],
            b_panel: vec![0.0; BLOCK * tile_n],
            chunk: vec![0.0; tiling.tile_m * tile_n],
            acc: vec![0.0; tiling.tile_m * tile_n],
            row_scale: vec![0.0; tiling.tile_m],
            col_scale: vec![0.0; tile_n],
        }
    }
}

/// Compute output rows `m0 .. m0 + band.len() / N` into `band`
pub(crate) fn compute_band(
    ops: &Operands<'_>,
    tiling: Tiling,
    m0: usize,
    band: &mut [bf16],
    scratch: &mut TileScratch,
) {
    let n = ops.shape.n;
    let rows = band.len() / n;
    debug_assert!(rows <= tiling.tile_m);
    debug_assert_eq!(band.len(), rows * n);

    let mut n0 = 0;
    while n0 < n {
        let cols = tiling.tile_n.min(n - n0);
        accumulate_tile(ops, m0, rows, n0, cols, scratch);

        for i in 0..rows {
            let acc_row = &scratch.acc[i * cols..(i + 1) * cols];
            let out_row = &mut band[i * n + n0..i * n + n0 + cols];
            for (out, &value) in out_row.iter_mut().zip(acc_row) {
                *out = bf16_from_f64(value);
            }
        }
        n0 += cols;
    }
}

/// Fill `scratch.acc[..rows * cols]` with the f64 result of one output tile
fn accumulate_tile(
    ops: &Operands<'_>,
    m0: usize,
    rows: usize,
    n0: usize,
    cols: usize,
    scratch: &mut TileScratch,
) {
    let GemmShape { m, n, k } = ops.shape;
    let n_blocks = n / BLOCK;
    let tile_len = rows * cols;

    let TileScratch {
        a_panel,
        b_panel,
        chunk,
        acc,
        row_scale,
        col_scale,
    } = scratch;
    let acc = &mut acc[..tile_len];
    acc.fill(0.0);

    for kb in 0..k / BLOCK {
        // Decode this chunk's slices. Values stay unscaled: the scale is
        // constant over the chunk and is applied to the exact sum below.
        for kk in 0..BLOCK {
            let kr = kb * BLOCK + kk;
            let a_src = &ops.a[kr * m + m0..kr * m + m0 + rows];
            for (dst, src) in a_panel[kk * rows..(kk + 1) * rows].iter_mut().zip(a_src) {
                *dst = src.to_f64();
            }
            let b_src = &ops.b[kr * n + n0..kr * n + n0 + cols];
            for (dst, src) in b_panel[kk * cols..(kk + 1) * cols].iter_mut().zip(b_src) {
                *dst = src.to_f64();
            }
        }

        let chunk = &mut chunk[..tile_len];
        chunk.fill(0.0);
        for kk in 0..BLOCK {
            let a_row = &a_panel[kk * rows..(kk + 1) * rows];
            let b_row = &b_panel[kk * cols..(kk + 1) * cols];
            for (i, &av) in a_row.iter().enumerate() {
                if av == 0.0 {
                    continue;
                }
                let c_row = &mut chunk[i * cols..(i + 1) * cols];
                for (c, &bv) in c_row.iter_mut().zip(b_row) {
                    *c += av * bv;
                }
            }
        }

        for (i, s) in row_scale[..rows].iter_mut().enumerate() {
            *s = f64::from(ops.a_scale[kb * m + m0 + i]);
        }
        for (j, s) in col_scale[..cols].iter_mut().enumerate() {
            *s = f64::from(ops.b_scale[kb * n_blocks + (n0 + j) / BLOCK]);
        }

        // A zero scale or a zero sum contributes exactly nothing, even when
        // the other factor is infinite.
        for (i, &sa) in row_scale[..rows].iter().enumerate() {
            if sa == 0.0 {
                continue;
            }
            let chunk_row = &chunk[i * cols..(i + 1) * cols];
            let acc_row = &mut acc[i * cols..(i + 1) * cols];
            for ((out, &raw), &sb) in acc_row.iter_mut().zip(chunk_row).zip(&col_scale[..cols]) {
                if sb == 0.0 || raw == 0.0 {
                    continue;
                }
                *out += raw * (sa * sb);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ones(len: usize) -> Vec<Fp8E4M3Fnuz> {
        vec![Fp8E4M3Fnuz::ONE; len]
    }

    #[test]
    fn test_compute_band_all_ones() {
        let shape = GemmShape::new(4, 128, 256);
        let a = ones(shape.k * shape.m);
        let b = ones(shape.k * shape.n);
        let a_scale = vec![1.0f32; shape.k_blocks() * shape.m];
        let b_scale = vec![1.0f32; shape.k_blocks() * shape.n_blocks()];
        let ops = Operands {
            a: &a,
            b: &b,
            a_scale: &a_scale,
            b_scale: &b_scale,
            shape,
        };
        let tiling = Tiling {
            tile_m: 4,
            tile_n: 64,
        };
        let mut band = vec![bf16::ZERO; shape.m * shape.n];
        let mut scratch = TileScratch::new(tiling, shape.n);
        compute_band(&ops, tiling, 0, &mut band, &mut scratch);
        assert!(band.iter().all(|v| v.to_f32() == 256.0));
    }

    #[test]
    fn test_compute_band_partial_band_and_offset() {
        // 3 rows starting at m0 = 2 of a 5-row problem
        let shape = GemmShape::new(5, 128, 128);
        let mut a = vec![Fp8E4M3Fnuz::ZERO; shape.k * shape.m];
        // a[k, m] = m + 1 for k == 0 only
        for (col, v) in a.iter_mut().take(shape.m).enumerate() {
            *v = Fp8E4M3Fnuz::from_f32((col + 1) as f32);
        }
        let b = ones(shape.k * shape.n);
        let a_scale = vec![1.0f32; shape.m];
        let b_scale = vec![0.5f32; 1];
        let ops = Operands {
            a: &a,
            b: &b,
            a_scale: &a_scale,
            b_scale: &b_scale,
            shape,
        };
        let tiling = Tiling {
            tile_m: 4,
            tile_n: 128,
        };
        let mut band = vec![bf16::ZERO; 3 * shape.n];
        let mut scratch = TileScratch::new(tiling, shape.n);
        compute_band(&ops, tiling, 2, &mut band, &mut scratch);
        for i in 0..3 {
            let expected = (i + 3) as f32 * 0.5;
            assert!(band[i * shape.n..(i + 1) * shape.n]
                .iter()
                .all(|v| v.to_f32() == expected));
        }
    }

    #[test]
    fn test_zero_scale_masks_infinite_partner_scale() {
        let shape = GemmShape::new(1, 128, 128);
        let a = ones(shape.k);
        let b = ones(shape.k * shape.n);
        let a_scale = vec![0.0f32];
        let b_scale = vec![f32::INFINITY];
        let ops = Operands {
            a: &a,
            b: &b,
            a_scale: &a_scale,
            b_scale: &b_scale,
            shape,
        };
        let tiling = Tiling {
            tile_m: 1,
            tile_n: 128,
        };
        let mut band = vec![bf16::ONE; shape.n];
        let mut scratch = TileScratch::new(tiling, shape.n);
        compute_band(&ops, tiling, 0, &mut band, &mut scratch);
        assert!(band.iter().all(|v| v.to_bits() == 0));
    }
}

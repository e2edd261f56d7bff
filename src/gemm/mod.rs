//! Block-scaled FP8 GEMM engine
//!
//! Computes `C[M, N] = A[K, M]^T * B[K, N]` where
//!
//! - `A` is FP8 with one f32 scale per (128-row K-block, column): `A_scale[K/128, M]`
//! - `B` is FP8 with one f32 scale per 128x128 tile: `B_scale[K/128, N/128]`
//! - `C` is bf16, rounded once from an f64 accumulator (round-to-nearest-even)
//!
//! ```text
//! C[m, n] = sum_k A[k, m] * A_scale[k/128, m] * B[k, n] * B_scale[k/128, n/128]
//! ```
//!
//! ## Call contract
//!
//! Every check runs before the first write: shape consistency, block
//! alignment, buffer lengths, shape-table membership and (by default) a
//! non-finite scan. On error C is untouched; on success every element of the
//! `M x N` region is overwritten.
//!
//! Results are bit-identical across calls and across thread counts: bands are
//! disjoint and each element's accumulation order is fixed.
//!
//! ## Example
//!
//! ```rust
//! use escalar::gemm::BlockScaledGemm;
//! use escalar::matrix::{Fp8Matrix, OutputMatrix, ScaleMatrix};
//! use escalar::{Fp8E4M3Fnuz, GemmConfig, GemmShape};
//!
//! let shape = GemmShape::new(128, 256, 256);
//! let engine = BlockScaledGemm::new(GemmConfig::new().with_supported_shape(shape)).unwrap();
//!
//! let a = vec![Fp8E4M3Fnuz::ONE; 256 * 128];
//! let b = vec![Fp8E4M3Fnuz::ONE; 256 * 256];
//! let a_scale = vec![1.0f32; 2 * 128];
//! let b_scale = vec![1.0f32; 2 * 2];
//! let mut c = vec![half::bf16::ZERO; 128 * 256];
//!
//! engine
//!     .gemm_into(
//!         &Fp8Matrix::new(&a, 256, 128),
//!         &Fp8Matrix::new(&b, 256, 256),
//!         &ScaleMatrix::new(&a_scale, 2, 128),
//!         &ScaleMatrix::new(&b_scale, 2, 2),
//!         &mut OutputMatrix::new(&mut c, 128, 256),
//!     )
//!     .unwrap();
//! assert!(c.iter().all(|v| v.to_f32() == 256.0));
//! ```

mod kernel;
pub mod reference;


use half::bf16;
use rayon::prelude::*;

use crate::config::{GemmConfig, NonFinitePolicy};
use crate::error::{EscalarError, Result};
use crate::matrix::{Fp8Matrix, OutputMatrix, ScaleMatrix};
use crate::shape::{GemmShape, ShapeRegistry};

use kernel::{compute_band, Operands, TileScratch, Tiling};

/// Engine for [`BLOCK`](crate::shape::BLOCK)-scaled FP8 GEMM with bf16 output
///
/// Holds only immutable settings: tiling, the supported shape table and an
/// optional dedicated thread pool. Calls are independent and stateless.
#[derive(Debug)]
pub struct BlockScaledGemm {
    config: GemmConfig,
    registry: ShapeRegistry,
    pool: Option<rayon::ThreadPool>,
}

impl Default for BlockScaledGemm {
    /// Default tiling, global rayon pool, reference shape table
    fn default() -> Self {
        Self {
            config: GemmConfig::default(),
            registry: ShapeRegistry::reference(),
            pool: None,
        }
    }
}

impl BlockScaledGemm {
    /// Build an engine from a configuration
    ///
    /// # Errors
    ///
    /// Returns configuration validation errors, or `InvalidConfiguration` if
    /// the dedicated thread pool cannot be created.
    pub fn new(config: GemmConfig) -> Result<Self> {
        config.validate()?;
        let registry = config.registry()?;
        let pool = match config.num_threads {
            Some(n) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .thread_name(|i| format!("escalar-gemm-{i}"))
                    .build()
                    .map_err(|e| {
                        EscalarError::InvalidConfiguration(format!(
                            "Failed to build {n}-thread GEMM pool: {e}"
                        ))
                    })?,
            ),
            None => None,
        };
        tracing::debug!(
            tile_m = config.tile_m,
            tile_n = config.tile_n,
            num_threads = ?config.num_threads,
            shapes = registry.len(),
            "built block-scaled GEMM engine"
        );
        Ok(Self {
            config,
            registry,
            pool,
        })
    }

    /// Build an engine from [`GemmConfig::from_env`]
    ///
    /// # Errors
    ///
    /// See [`GemmConfig::from_env`] and [`new`](Self::new).
    pub fn from_env() -> Result<Self> {
        Self::new(GemmConfig::from_env()?)
    }

    /// Replace the supported shape table
    #[must_use]
    pub fn with_registry(mut self, registry: ShapeRegistry) -> Self {
        self.config.supported_shapes = registry.iter().copied().collect();
        self.registry = registry;
        self
    }

    /// Supported shape table
    #[must_use]
    pub fn registry(&self) -> &ShapeRegistry {
        &self.registry
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &GemmConfig {
        &self.config
    }

    /// Check a call without computing anything
    ///
    /// # Errors
    ///
    /// Any error [`gemm_into`](Self::gemm_into) would report.
    pub fn validate(
        &self,
        a: &Fp8Matrix<'_>,
        b: &Fp8Matrix<'_>,
        a_scale: &ScaleMatrix<'_>,
        b_scale: &ScaleMatrix<'_>,
        c: &OutputMatrix<'_>,
    ) -> Result<GemmShape> {
        c.check_len("C")?;
        self.check_call(a, b, a_scale, b_scale, (c.rows(), c.cols()))
    }

    /// Compute `C = A^T * B` into a caller-owned buffer
    ///
    /// # Errors
    ///
    /// - `InvalidShape`: zero dimension or inconsistent shapes
    /// - `MisalignedDimension`: K or N not a multiple of [`BLOCK`](crate::shape::BLOCK)
    /// - `BufferTooSmall`: a buffer is shorter than its declared shape
    /// - `UnsupportedShape`: (M, N, K) is not in the shape table
    /// - `NonFiniteInput`: NaN code or non-finite scale under [`NonFinitePolicy::Reject`]
    ///
    /// C is not modified when an error is returned.
    pub fn gemm_into(
        &self,
        a: &Fp8Matrix<'_>,
        b: &Fp8Matrix<'_>,
        a_scale: &ScaleMatrix<'_>,
        b_scale: &ScaleMatrix<'_>,
        c: &mut OutputMatrix<'_>,
    ) -> Result<GemmShape> {
        let shape = self.validate(a, b, a_scale, b_scale, c)?;
        let ops = Operands {
            a: a.data(),
            b: b.data(),
            a_scale: a_scale.data(),
            b_scale: b_scale.data(),
            shape,
        };
        self.execute(&ops, c.active_mut());
        Ok(shape)
    }

    /// Compute `C = A^T * B` into a new `M x N` buffer
    ///
    /// # Errors
    ///
    /// Same as [`gemm_into`](Self::gemm_into) except `BufferTooSmall` for C.
    pub fn gemm(
        &self,
        a: &Fp8Matrix<'_>,
        b: &Fp8Matrix<'_>,
        a_scale: &ScaleMatrix<'_>,
        b_scale: &ScaleMatrix<'_>,
    ) -> Result<Vec<bf16>> {
        let shape = self.check_call(a, b, a_scale, b_scale, (a.cols(), b.cols()))?;
        let ops = Operands {
            a: a.data(),
            b: b.data(),
            a_scale: a_scale.data(),
            b_scale: b_scale.data(),
            shape,
        };
        let mut out = vec![bf16::ZERO; shape.m * shape.n];
        self.execute(&ops, &mut out);
        Ok(out)
    }

    fn check_call(
        &self,
        a: &Fp8Matrix<'_>,
        b: &Fp8Matrix<'_>,
        a_scale: &ScaleMatrix<'_>,
        b_scale: &ScaleMatrix<'_>,
        c_dims: (usize, usize),
    ) -> Result<GemmShape> {
        let result = check_operands(a, b, a_scale, b_scale, c_dims).and_then(|shape| {
            if !self.registry.contains(&shape) {
                return Err(EscalarError::UnsupportedShape { shape });
            }
            if self.config.non_finite == NonFinitePolicy::Reject {
                check_finite(a, b, a_scale, b_scale)?;
            }
            Ok(shape)
        });
        if let Err(ref e) = result {
            tracing::debug!(error = %e, "rejected block-scaled GEMM call");
        }
        result
    }

    fn execute(&self, ops: &Operands<'_>, out: &mut [bf16]) {
        let shape = ops.shape;
        let tiling = Tiling {
            tile_m: self.config.tile_m.min(shape.m),
            tile_n: self.config.tile_n,
        };
        // tile_m <= M, and M * N was checked against the C buffer length
        let band_len = tiling.tile_m * shape.n;
        let bands = shape.m.div_ceil(tiling.tile_m);
        let parallel = shape.macs() >= self.config.parallel_threshold && bands > 1;

        tracing::debug!(
            shape = %shape,
            bands,
            tile_m = tiling.tile_m,
            tile_n = tiling.tile_n,
            parallel,
            "dispatching block-scaled GEMM"
        );

        if !parallel {
            let mut scratch = TileScratch::new(tiling, shape.n);
            for (band_idx, band) in out.chunks_mut(band_len).enumerate() {
                compute_band(ops, tiling, band_idx * tiling.tile_m, band, &mut scratch);
            }
            return;
        }

        match &self.pool {
            Some(pool) => pool.install(|| run_bands_parallel(ops, tiling, out)),
            None => run_bands_parallel(ops, tiling, out),
        }
    }
}

fn run_bands_parallel(ops: &Operands<'_>, tiling: Tiling, out: &mut [bf16]) {
    let n = ops.shape.n;
    out.par_chunks_mut(tiling.tile_m * n).enumerate().for_each_init(
        || TileScratch::new(tiling, n),
        |scratch, (band_idx, band)| {
            tracing::trace!(band = band_idx, "computing band");
            compute_band(ops, tiling, band_idx * tiling.tile_m, band, scratch);
        },
    );
}

/// Shape consistency, alignment and length checks shared with the reference
pub(crate) fn check_operands(
    a: &Fp8Matrix<'_>,
    b: &Fp8Matrix<'_>,
    a_scale: &ScaleMatrix<'_>,
    b_scale: &ScaleMatrix<'_>,
    c_dims: (usize, usize),
) -> Result<GemmShape> {
    if a.rows() != b.rows() {
        return Err(EscalarError::InvalidShape {
            reason: format!(
                "A is {}x{} and B is {}x{}: leading (K) dimensions differ",
                a.rows(),
                a.cols(),
                b.rows(),
                b.cols()
            ),
        });
    }
    let shape = GemmShape::new(a.cols(), b.cols(), a.rows());
    shape.check_alignment()?;

    let expected_a_scale = (shape.k_blocks(), shape.m);
    if (a_scale.rows(), a_scale.cols()) != expected_a_scale {
        return Err(EscalarError::InvalidShape {
            reason: format!(
                "A_scale is {}x{}, expected {}x{} for K={} M={}",
                a_scale.rows(),
                a_scale.cols(),
                expected_a_scale.0,
                expected_a_scale.1,
                shape.k,
                shape.m
            ),
        });
    }
    let expected_b_scale = (shape.k_blocks(), shape.n_blocks());
    if (b_scale.rows(), b_scale.cols()) != expected_b_scale {
        return Err(EscalarError::InvalidShape {
            reason: format!(
                "B_scale is {}x{}, expected {}x{} for K={} N={}",
                b_scale.rows(),
                b_scale.cols(),
                expected_b_scale.0,
                expected_b_scale.1,
                shape.k,
                shape.n
            ),
        });
    }
    if c_dims != (shape.m, shape.n) {
        return Err(EscalarError::InvalidShape {
            reason: format!(
                "C is {}x{}, expected {}x{}",
                c_dims.0, c_dims.1, shape.m, shape.n
            ),
        });
    }

    a.check_len("A")?;
    b.check_len("B")?;
    a_scale.check_len("A_scale")?;
    b_scale.check_len("B_scale")?;
    Ok(shape)
}

fn check_finite(
    a: &Fp8Matrix<'_>,
    b: &Fp8Matrix<'_>,
    a_scale: &ScaleMatrix<'_>,
    b_scale: &ScaleMatrix<'_>,
) -> Result<()> {
    let fp8_operands = [("A", a), ("B", b)];
    for (buffer, operand) in fp8_operands {
        let len = operand.rows() * operand.cols();
        if let Some(index) = operand.data()[..len].iter().position(|v| v.is_nan()) {
            return Err(EscalarError::NonFiniteInput { buffer, index });
        }
    }
    let scale_operands = [("A_scale", a_scale), ("B_scale", b_scale)];
    for (buffer, scales) in scale_operands {
        let len = scales.rows() * scales.cols();
        if let Some(index) = scales.data()[..len].iter().position(|s| !s.is_finite()) {
            return Err(EscalarError::NonFiniteInput { buffer, index });
        }
    }
    Ok(())
}

static DEFAULT_ENGINE: std::sync::LazyLock<BlockScaledGemm> =
    std::sync::LazyLock::new(BlockScaledGemm::default);

/// [`BlockScaledGemm::gemm_into`] on the default engine
///
/// The default engine supports only the reference shape
/// ([`REFERENCE_SHAPE`](crate::shape::REFERENCE_SHAPE)); build a
/// [`BlockScaledGemm`] with a wider table for anything else.
///
/// # Errors
///
/// See [`BlockScaledGemm::gemm_into`].
pub fn gemm_into(
    a: &Fp8Matrix<'_>,
    b: &Fp8Matrix<'_>,
    a_scale: &ScaleMatrix<'_>,
    b_scale: &ScaleMatrix<'_>,
    c: &mut OutputMatrix<'_>,
) -> Result<GemmShape> {
    DEFAULT_ENGINE.gemm_into(a, b, a_scale, b_scale, c)
}

/// [`BlockScaledGemm::gemm`] on the default engine
///
/// # Errors
///
/// See [`BlockScaledGemm::gemm`].
pub fn gemm(
    a: &Fp8Matrix<'_>,
    b: &Fp8Matrix<'_>,
    a_scale: &ScaleMatrix<'_>,
    b_scale: &ScaleMatrix<'_>,
) -> Result<Vec<bf16>> {
    DEFAULT_ENGINE.gemm(a, b, a_scale, b_scale)
}

//! # Escalar
//!
//! Pure Rust block-scaled FP8 GEMM for CPU inference.
//!
//! Escalar (Spanish: "to scale") multiplies FP8 E4M3FNUZ operands that carry
//! per-block f32 scale factors and writes a bf16 result. It is the inner
//! kernel of FP8-quantized transformer layers: weights and activations are
//! stored in 8 bits and rescaled per 128-element block along K.
//!
//! ## Features
//!
//! - **Exact FP8 decoding**: 256-entry table for E4M3FNUZ (bias 8, single NaN, no infinities)
//! - **Block scaling**: one A scale per (K-block, column), one B scale per 128x128 tile
//! - **Deterministic**: bit-identical output across runs and thread counts
//! - **Validated calls**: shapes, lengths and non-finite inputs are checked before any write
//!
//! ## Example
//!
//! ```rust
//! use escalar::quantize::{quantize_lhs, quantize_rhs};
//! use escalar::{BlockScaledGemm, GemmConfig, GemmShape};
//!
//! let shape = GemmShape::new(2, 128, 128);
//! let engine = BlockScaledGemm::new(GemmConfig::new().with_supported_shape(shape)).unwrap();
//!
//! let a = quantize_lhs(&vec![0.5f32; 128 * 2], 128, 2).unwrap();
//! let b = quantize_rhs(&vec![2.0f32; 128 * 128], 128, 128).unwrap();
//!
//! let c = engine
//!     .gemm(&a.operand(), &b.operand(), &a.scales(), &b.scales())
//!     .unwrap();
//! assert_eq!(c.len(), 2 * 128);
//! assert!(c.iter().all(|v| v.to_f32() == 128.0));
//! ```
//!
//! ## Architecture
//!
//! - [`format`]: FP8 and bf16 number formats
//! - [`shape`]: problem dimensions and the supported shape table
//! - [`matrix`]: borrowed row-major views over caller buffers
//! - [`gemm`]: the tiled, rayon-parallel engine and a naive reference
//! - [`quantize`]: helpers that produce FP8 operands with block scales
//! - [`config`]: tiling, threading and non-finite policy

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
// Clippy allows (MUST come after deny/warn to override them)
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)] // usize -> f32 in test data
#![allow(clippy::cast_possible_truncation)] // f32 -> u8 code arithmetic is range-checked
#![allow(clippy::cast_sign_loss)] // Rounded magnitudes are non-negative
#![allow(clippy::cast_possible_wrap)] // Exponent fields fit in i32
#![allow(clippy::must_use_candidate)] // Not all methods need #[must_use]
#![allow(clippy::doc_markdown)] // Allow technical terms without backticks
#![allow(clippy::missing_panics_doc)] // Allow missing Panics doc sections
#![allow(clippy::float_cmp)] // Exact comparisons are the point of several tests
#![allow(clippy::cast_lossless)] // Allow u8 to f32 casts
#![allow(clippy::many_single_char_names)] // m, n, k, a, b, c

pub mod config;
pub mod error;
pub mod format;
pub mod gemm;
pub mod matrix;
pub mod quantize;
pub mod shape;
pub mod testing;

// Re-exports for convenience
pub use config::{GemmConfig, NonFinitePolicy};
pub use error::{EscalarError, Result};
pub use format::Fp8E4M3Fnuz;
pub use gemm::{gemm, gemm_into, BlockScaledGemm};
pub use matrix::{Fp8Matrix, OutputMatrix, ScaleMatrix};
pub use shape::{GemmShape, ShapeRegistry, BLOCK, REFERENCE_SHAPE};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.starts_with("0."));
        assert!(VERSION.contains('.'));
    }
}

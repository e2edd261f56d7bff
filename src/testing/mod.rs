//! GEMM Fixture Testing Infrastructure
//!
//! Owned operand sets plus the views the engine consumes, so tests and
//! benches build a problem once and run it through several engines.
//!
//! # Design
//!
//! ```text
//! GemmShape → SyntheticGemmGenerator → GemmFixture → (A, B, A_scale, B_scale) views
//!                                           ↓
//!                               BlockScaledGemm / reference_gemm_f64
//! ```

pub mod generators;

use half::bf16;

use crate::error::Result;
use crate::gemm::reference::reference_gemm_f64;
use crate::gemm::BlockScaledGemm;
use crate::format::Fp8E4M3Fnuz;
use crate::matrix::{Fp8Matrix, OutputMatrix, ScaleMatrix};
use crate::shape::GemmShape;

pub use generators::SyntheticGemmGenerator;

/// Owned operands for one GEMM problem
#[derive(Debug, Clone, PartialEq)]
pub struct GemmFixture {
    /// Problem dimensions
    pub shape: GemmShape,
    /// A, `K x M`
    pub a: Vec<Fp8E4M3Fnuz>,
    /// B, `K x N`
    pub b: Vec<Fp8E4M3Fnuz>,
    /// A scales, `K/128 x M`
    pub a_scale: Vec<f32>,
    /// B scales, `K/128 x N/128`
    pub b_scale: Vec<f32>,
}

impl GemmFixture {
    /// Every element of A and B set to `value`, every scale set to 1.0
    #[must_use]
    pub fn uniform(shape: GemmShape, value: Fp8E4M3Fnuz) -> Self {
        Self {
            shape,
            a: vec![value; shape.k * shape.m],
            b: vec![value; shape.k * shape.n],
            a_scale: vec![1.0; shape.k_blocks() * shape.m],
            b_scale: vec![1.0; shape.k_blocks() * shape.n_blocks()],
        }
    }

    /// View of A
    #[must_use]
    pub fn a(&self) -> Fp8Matrix<'_> {
        Fp8Matrix::new(&self.a, self.shape.k, self.shape.m)
    }

    /// View of B
    #[must_use]
    pub fn b(&self) -> Fp8Matrix<'_> {
        Fp8Matrix::new(&self.b, self.shape.k, self.shape.n)
    }

    /// View of the A scales
    #[must_use]
    pub fn a_scale(&self) -> ScaleMatrix<'_> {
        ScaleMatrix::new(&self.a_scale, self.shape.k_blocks(), self.shape.m)
    }

    /// View of the B scales
    #[must_use]
    pub fn b_scale(&self) -> ScaleMatrix<'_> {
        ScaleMatrix::new(&self.b_scale, self.shape.k_blocks(), self.shape.n_blocks())
    }

    /// Zero-filled output buffer of the right size
    #[must_use]
    pub fn output(&self) -> Vec<bf16> {
        vec![bf16::ZERO; self.shape.m * self.shape.n]
    }

    /// Run `engine` into a caller-owned `M x N` buffer
    ///
    /// # Errors
    ///
    /// Propagates engine errors.
    pub fn run_into(&self, engine: &BlockScaledGemm, c: &mut [bf16]) -> Result<GemmShape> {
        let mut out = OutputMatrix::new(c, self.shape.m, self.shape.n);
        engine.gemm_into(&self.a(), &self.b(), &self.a_scale(), &self.b_scale(), &mut out)
    }

    /// Run `engine` into a fresh buffer
    ///
    /// # Errors
    ///
    /// Propagates engine errors.
    pub fn run(&self, engine: &BlockScaledGemm) -> Result<Vec<bf16>> {
        engine.gemm(&self.a(), &self.b(), &self.a_scale(), &self.b_scale())
    }

    /// f64 reference result
    ///
    /// # Errors
    ///
    /// Propagates shape errors.
    pub fn reference(&self) -> Result<Vec<f64>> {
        reference_gemm_f64(&self.a(), &self.b(), &self.a_scale(), &self.b_scale())
    }
}

/// Largest relative error between `actual` and `expected`
///
/// Elements whose expected magnitude is below `floor` are compared
/// against `floor` instead, so cancellation near zero does not dominate.
#[must_use]
pub fn max_relative_error(actual: &[bf16], expected: &[f64], floor: f64) -> f64 {
    actual
        .iter()
        .zip(expected)
        .map(|(&got, &want)| (f64::from(got.to_f32()) - want).abs() / want.abs().max(floor))
        .fold(0.0, f64::max)
}

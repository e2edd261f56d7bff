//! Naive reference GEMM
//!
//! Dequantizes every element and sums products in f64 in plain `k` order.
//! Shape and length checks match the engine; the shape table and the
//! non-finite policy are not consulted.

use half::bf16;

use crate::error::Result;
use crate::format::bf16_from_f64;
use crate::matrix::{Fp8Matrix, ScaleMatrix};
use crate::shape::BLOCK;

use super::check_operands;

/// `C[m, n] = sum_k (A[k, m] * sa) * (B[k, n] * sb)` in f64, row-major `M x N`
///
/// # Errors
///
/// Shape, alignment and buffer length errors as for
/// [`BlockScaledGemm::gemm`](super::BlockScaledGemm::gemm).
pub fn reference_gemm_f64(
    a: &Fp8Matrix<'_>,
    b: &Fp8Matrix<'_>,
    a_scale: &ScaleMatrix<'_>,
    b_scale: &ScaleMatrix<'_>,
) -> Result<Vec<f64>> {
    let shape = check_operands(a, b, a_scale, b_scale, (a.cols(), b.cols()))?;
    let mut out = vec![0.0f64; shape.m * shape.n];

    for m in 0..shape.m {
        for n in 0..shape.n {
            let mut sum = 0.0f64;
            for k in 0..shape.k {
                let a_val = a.get(k, m).to_f64() * f64::from(a_scale.get(k / BLOCK, m));
                let b_val = b.get(k, n).to_f64() * f64::from(b_scale.get(k / BLOCK, n / BLOCK));
                sum += a_val * b_val;
            }
            out[m * shape.n + n] = sum;
        }
    }
    Ok(out)
}

/// [`reference_gemm_f64`] rounded to bf16 with round-to-nearest-even
///
/// # Errors
///
/// See [`reference_gemm_f64`].
pub fn reference_gemm_bf16(
    a: &Fp8Matrix<'_>,
    b: &Fp8Matrix<'_>,
    a_scale: &ScaleMatrix<'_>,
    b_scale: &ScaleMatrix<'_>,
) -> Result<Vec<bf16>> {
    Ok(reference_gemm_f64(a, b, a_scale, b_scale)?
        .into_iter()
        .map(bf16_from_f64)
        .collect())
}

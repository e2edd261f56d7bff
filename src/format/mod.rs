//! Narrow floating-point formats
//!
//! - [`Fp8E4M3Fnuz`]: operand format (1-4-3, bias 8, finite-only)
//! - `bf16`: output format (1-8-7), stored as [`half::bf16`]
//!
//! Both are handled as explicit bit layouts with documented codecs.

pub mod bf16;
pub mod fp8;

pub use self::bf16::{bf16_from_f32, bf16_from_f64};
pub use fp8::{Fp8E4M3Fnuz, FP8_MAX, FP8_MIN_NORMAL, FP8_MIN_SUBNORMAL};

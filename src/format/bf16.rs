//! bf16 encoding
//!
//! bf16 keeps the f32 exponent (8 bits) and truncates the mantissa to 7 bits,
//! so it is the upper half of an f32 bit pattern. Storage uses [`half::bf16`];
//! the rounding lives here so the engine's rounding mode is explicit.
//!
//! Rounding mode is round-to-nearest, ties-to-even. Overflow rounds to
//! infinity, NaN stays NaN (quieted, sign kept).

use half::bf16;

/// Encode an f32 as bf16 with round-to-nearest-even
#[inline]
#[must_use]
pub fn bf16_from_f32(value: f32) -> bf16 {
    let bits = value.to_bits();
    if value.is_nan() {
        return bf16::from_bits(((bits >> 16) as u16) | 0x0040);
    }
    let lsb = (bits >> 16) & 1;
    let rounded = bits + 0x7FFF + lsb;
    bf16::from_bits((rounded >> 16) as u16)
}

/// Encode an f64 as bf16 with a single round-to-nearest-even step.
///
/// Going through `value as f32` first would round twice and can land on the
/// wrong side of a bf16 midpoint. Instead the value is narrowed to f32 with
/// round-to-odd, which keeps a sticky bit far below the bf16 rounding
/// position, and then rounded once.
#[inline]
#[must_use]
pub fn bf16_from_f64(value: f64) -> bf16 {
    if value.is_nan() {
        return if value.is_sign_negative() {
            bf16::from_bits(0xFFC0)
        } else {
            bf16::from_bits(0x7FC0)
        };
    }
    bf16_from_f32(f64_to_f32_round_to_odd(value))
}

fn f64_to_f32_round_to_odd(value: f64) -> f32 {
    let nearest = value as f32;
    if value.is_infinite() || f64::from(nearest) == value {
        return nearest;
    }
    let bits = nearest.to_bits();
    let sign = bits & 0x8000_0000;
    let mut magnitude = bits & 0x7FFF_FFFF;
    if f64::from(nearest).abs() > value.abs() {
        // Step back toward zero to get the truncated value.
        magnitude -= 1;
    }
    f32::from_bits(sign | magnitude | 1)
}

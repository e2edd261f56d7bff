//! FP8 E4M3FNUZ codec
//!
//! Bit layout `S EEEE MMM`, exponent bias 8:
//!
//! | Field | Bits | Notes |
//! |-------|------|-------|
//! | sign | 7 | `0x80` alone is NaN, so there is no negative zero |
//! | exponent | 6..3 | bias 8, `0` selects subnormals |
//! | mantissa | 2..0 | implicit leading one for normals |
//!
//! - Normal: `(-1)^S * 2^(E-8) * (1 + M/8)`
//! - Subnormal: `(-1)^S * 2^-7 * (M/8)` = `M * 2^-10`
//! - No infinities. Max finite `±240`, min normal `2^-7`, min subnormal `2^-10`.
//!
//! Decoding goes through a 256-entry table built on first use.

use std::fmt;

/// Exponent bias of the FNUZ variant
pub const FP8_EXPONENT_BIAS: i32 = 8;

/// Largest finite magnitude
pub const FP8_MAX: f32 = 240.0;

/// Smallest normal magnitude (`2^-7`)
pub const FP8_MIN_NORMAL: f32 = 0.007_812_5;

/// Smallest subnormal magnitude (`2^-10`)
pub const FP8_MIN_SUBNORMAL: f32 = 0.000_976_562_5;

const NAN_BITS: u8 = 0x80;

/// Decoded value of every FP8 code.
///
/// Built once; immutable afterwards.
static FP8_TO_F32_LUT: std::sync::LazyLock<[f32; 256]> = std::sync::LazyLock::new(|| {
    let mut lut = [0.0f32; 256];
    for (bits, slot) in lut.iter_mut().enumerate() {
        *slot = decode_bits(bits as u8);
    }
    lut
});

fn decode_bits(bits: u8) -> f32 {
    if bits == NAN_BITS {
        return f32::NAN;
    }
    let exponent = i32::from((bits >> 3) & 0x0F);
    let mantissa = f32::from(bits & 0x07);
    let magnitude = if exponent == 0 {
        mantissa * FP8_MIN_SUBNORMAL
    } else {
        (1.0 + mantissa / 8.0) * 2.0f32.powi(exponent - FP8_EXPONENT_BIAS)
    };
    if bits & 0x80 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// 8-bit float, 4 exponent bits, 3 mantissa bits, finite-only, unsigned zero
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct Fp8E4M3Fnuz(u8);

impl Fp8E4M3Fnuz {
    /// `+0.0` (the only zero)
    pub const ZERO: Self = Self(0x00);
    /// `1.0`
    pub const ONE: Self = Self(0x40);
    /// `240.0`
    pub const MAX: Self = Self(0x7F);
    /// `-240.0`
    pub const MIN: Self = Self(0xFF);
    /// Smallest positive subnormal, `2^-10`
    pub const MIN_POSITIVE_SUBNORMAL: Self = Self(0x01);
    /// Smallest positive normal, `2^-7`
    pub const MIN_POSITIVE: Self = Self(0x08);
    /// The single NaN encoding
    pub const NAN: Self = Self(NAN_BITS);

    /// Wrap a raw bit pattern
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw bit pattern
    #[inline]
    #[must_use]
    pub const fn to_bits(self) -> u8 {
        self.0
    }

    /// True for the NaN code `0x80`
    #[inline]
    #[must_use]
    pub const fn is_nan(self) -> bool {
        self.0 == NAN_BITS
    }

    /// True for `+0.0`
    #[inline]
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Decode to f32 (exact)
    #[inline]
    #[must_use]
    pub fn to_f32(self) -> f32 {
        FP8_TO_F32_LUT[self.0 as usize]
    }

    /// Decode to f64 (exact)
    #[inline]
    #[must_use]
    pub fn to_f64(self) -> f64 {
        f64::from(self.to_f32())
    }

    /// Encode an f32 with round-to-nearest-even.
    ///
    /// Magnitudes at or above 240 (including infinities) saturate to `±MAX`.
    /// NaN maps to the NaN code. Anything that rounds to zero becomes `ZERO`,
    /// whatever its sign.
    #[must_use]
    pub fn from_f32(value: f32) -> Self {
        if value.is_nan() {
            return Self::NAN;
        }
        let negative = value.is_sign_negative();
        let magnitude = value.abs();

        let code = if magnitude >= FP8_MAX {
            Self::MAX.0
        } else if magnitude < FP8_MIN_NORMAL {
            // Subnormal grid is uniform with step 2^-10; code 8 is the min normal.
            (magnitude * 1024.0).round_ties_even() as u8
        } else {
            let exponent = ((magnitude.to_bits() >> 23) & 0xFF) as i32 - 127;
            // Power-of-two scaling is exact: lands in [8, 16).
            let scaled = magnitude * 2.0f32.powi(3 - exponent);
            let rounded = scaled.round_ties_even() as u8;
            let biased = (exponent + FP8_EXPONENT_BIAS) as u8;
            // rounded == 16 carries into the exponent field.
            (biased << 3) + (rounded - 8)
        };

        if code == 0 {
            Self::ZERO
        } else if negative {
            Self(code | 0x80)
        } else {
            Self(code)
        }
    }

    /// Reinterpret raw bytes as FP8 values without copying
    #[must_use]
    pub fn slice_from_bits(bits: &[u8]) -> &[Self] {
        // SAFETY: Self is repr(transparent) over u8, so layout and alignment match
        // and every u8 is a valid Self.
        unsafe { std::slice::from_raw_parts(bits.as_ptr().cast::<Self>(), bits.len()) }
    }

    /// View FP8 values as raw bytes without copying
    #[must_use]
    pub fn slice_as_bits(values: &[Self]) -> &[u8] {
        // SAFETY: Self is repr(transparent) over u8.
        unsafe { std::slice::from_raw_parts(values.as_ptr().cast::<u8>(), values.len()) }
    }
}

impl From<Fp8E4M3Fnuz> for f32 {
    fn from(value: Fp8E4M3Fnuz) -> Self {
        value.to_f32()
    }
}

impl fmt::Debug for Fp8E4M3Fnuz {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fp8E4M3Fnuz({:#04x} = {})", self.0, self.to_f32())
    }
}

impl fmt::Display for Fp8E4M3Fnuz {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.to_f32(), f)
    }
}

//! Synthetic Operand Generators
//!
//! Deterministic FP8 data and scale generation for reproducible GEMM
//! fixtures. Every method reseeds from the generator's seed, so the same
//! call always returns the same data.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::GemmFixture;
use crate::format::Fp8E4M3Fnuz;
use crate::shape::GemmShape;

/// Power-of-two scales; products of these keep the engine bit-exact
pub const POWER_OF_TWO_SCALES: [f32; 5] = [0.25, 0.5, 1.0, 2.0, 4.0];

/// Deterministic operand generator
///
/// # Example
///
/// ```rust
/// use escalar::testing::generators::SyntheticGemmGenerator;
///
/// let gen = SyntheticGemmGenerator::new(42);
/// let codes = gen.generate_fp8(256);
/// assert_eq!(codes.len(), 256);
/// assert!(codes.iter().all(|c| !c.is_nan()));
/// assert_eq!(codes, gen.generate_fp8(256));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct SyntheticGemmGenerator {
    seed: u64,
}

impl SyntheticGemmGenerator {
    /// Create generator with specific seed
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Seed this generator was built with
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    fn rng(&self, stream: u64) -> StdRng {
        StdRng::seed_from_u64(self.seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ stream)
    }

    /// Uniformly random non-NaN FP8 codes
    #[must_use]
    pub fn generate_fp8(&self, len: usize) -> Vec<Fp8E4M3Fnuz> {
        let mut rng = self.rng(1);
        (0..len)
            .map(|_| {
                let mut bits: u8 = rng.gen();
                if bits == Fp8E4M3Fnuz::NAN.to_bits() {
                    bits = 0;
                }
                Fp8E4M3Fnuz::from_bits(bits)
            })
            .collect()
    }

    /// FP8 codes for values in `[-bound, bound]`, rounded on encode
    #[must_use]
    pub fn generate_fp8_bounded(&self, len: usize, bound: f32) -> Vec<Fp8E4M3Fnuz> {
        let mut rng = self.rng(2);
        (0..len)
            .map(|_| Fp8E4M3Fnuz::from_f32(rng.gen_range(-bound..=bound)))
            .collect()
    }

    /// Positive scales drawn uniformly from `[lo, hi)`
    #[must_use]
    pub fn generate_scales(&self, len: usize, lo: f32, hi: f32) -> Vec<f32> {
        let mut rng = self.rng(3);
        (0..len).map(|_| rng.gen_range(lo..hi)).collect()
    }

    /// Scales drawn from [`POWER_OF_TWO_SCALES`]
    #[must_use]
    pub fn generate_power_of_two_scales(&self, len: usize) -> Vec<f32> {
        let mut rng = self.rng(4);
        (0..len)
            .map(|_| POWER_OF_TWO_SCALES[rng.gen_range(0..POWER_OF_TWO_SCALES.len())])
            .collect()
    }

    /// Random operands with scales in `[0.01, 2.0)`
    #[must_use]
    pub fn fixture(&self, shape: GemmShape) -> GemmFixture {
        let (a, b) = self.operands(shape);
        let with_a = SyntheticGemmGenerator::new(self.seed ^ 0xA);
        let with_b = SyntheticGemmGenerator::new(self.seed ^ 0xB);
        GemmFixture {
            shape,
            a,
            b,
            a_scale: with_a.generate_scales(shape.k_blocks() * shape.m, 0.01, 2.0),
            b_scale: with_b.generate_scales(shape.k_blocks() * shape.n_blocks(), 0.01, 2.0),
        }
    }

    /// Random operands with power-of-two scales
    #[must_use]
    pub fn power_of_two_fixture(&self, shape: GemmShape) -> GemmFixture {
        let (a, b) = self.operands(shape);
        let with_a = SyntheticGemmGenerator::new(self.seed ^ 0xA);
        let with_b = SyntheticGemmGenerator::new(self.seed ^ 0xB);
        GemmFixture {
            shape,
            a,
            b,
            a_scale: with_a.generate_power_of_two_scales(shape.k_blocks() * shape.m),
            b_scale: with_b.generate_power_of_two_scales(shape.k_blocks() * shape.n_blocks()),
        }
    }

    fn operands(&self, shape: GemmShape) -> (Vec<Fp8E4M3Fnuz>, Vec<Fp8E4M3Fnuz>) {
        let a = SyntheticGemmGenerator::new(self.seed ^ 0x1).generate_fp8(shape.k * shape.m);
        let b = SyntheticGemmGenerator::new(self.seed ^ 0x2).generate_fp8(shape.k * shape.n);
        (a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_fp8_deterministic_and_nan_free() {
        let gen = SyntheticGemmGenerator::new(7);
        let first = gen.generate_fp8(4096);
        assert_eq!(first, gen.generate_fp8(4096));
        assert!(first.iter().all(|c| !c.is_nan()));
        assert_ne!(first, SyntheticGemmGenerator::new(8).generate_fp8(4096));
    }

    #[test]
    fn test_generate_fp8_bounded() {
        let codes = SyntheticGemmGenerator::new(1).generate_fp8_bounded(1000, 4.0);
        assert!(codes.iter().all(|c| c.to_f32().abs() <= 4.0));
    }

    #[test]
    fn test_generate_scales_in_range() {
        let scales = SyntheticGemmGenerator::new(3).generate_scales(500, 0.5, 1.5);
        assert!(scales.iter().all(|&s| (0.5..1.5).contains(&s)));
        let pow2 = SyntheticGemmGenerator::new(3).generate_power_of_two_scales(500);
        assert!(pow2.iter().all(|s| POWER_OF_TWO_SCALES.contains(s)));
    }

    #[test]
    fn test_fixture_dimensions() {
        let shape = GemmShape::new(3, 256, 384);
        let fixture = SyntheticGemmGenerator::new(11).fixture(shape);
        assert_eq!(fixture.a.len(), 384 * 3);
        assert_eq!(fixture.b.len(), 384 * 256);
        assert_eq!(fixture.a_scale.len(), 3 * 3);
        assert_eq!(fixture.b_scale.len(), 3 * 2);
        assert_ne!(fixture.a[..64], fixture.b[..64]);
    }
}

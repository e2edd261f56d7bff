//! GEMM shapes and the supported-shape table
//!
//! The engine only runs (M, N, K) triples that appear in a [`ShapeRegistry`].
//! The registry is plain data: tests and callers can enumerate it, extend it
//! from configuration, or build one from scratch.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EscalarError, Result};

/// Quantization block size along K (and along N for the B operand)
pub const BLOCK: usize = 128;

/// Problem size of `C[M, N] = A[K, M]^T * B[K, N]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GemmShape {
    /// Rows of C, columns of A
    pub m: usize,
    /// Columns of C and B
    pub n: usize,
    /// Contraction dimension, leading dimension of A and B
    pub k: usize,
}

impl GemmShape {
    /// Create a shape
    #[must_use]
    pub const fn new(m: usize, n: usize, k: usize) -> Self {
        Self { m, n, k }
    }

    /// Number of quantization blocks along K
    #[must_use]
    pub const fn k_blocks(&self) -> usize {
        self.k / BLOCK
    }

    /// Number of quantization blocks along N
    #[must_use]
    pub const fn n_blocks(&self) -> usize {
        self.n / BLOCK
    }

    /// Multiply-accumulate count, `M * N * K`, saturating at `usize::MAX`
    #[must_use]
    pub const fn macs(&self) -> usize {
        self.m.saturating_mul(self.n).saturating_mul(self.k)
    }

    /// Check that all dimensions are positive and K, N are block-aligned
    ///
    /// # Errors
    ///
    /// - `InvalidShape` if any dimension is zero
    /// - `MisalignedDimension` if K or N is not a multiple of [`BLOCK`]
    pub fn check_alignment(&self) -> Result<()> {
        if self.m == 0 || self.n == 0 || self.k == 0 {
            return Err(EscalarError::InvalidShape {
                reason: format!("GEMM dimensions must be positive, got {self}"),
            });
        }
        if self.k % BLOCK != 0 {
            return Err(EscalarError::MisalignedDimension {
                axis: "K",
                value: self.k,
                block: BLOCK,
            });
        }
        if self.n % BLOCK != 0 {
            return Err(EscalarError::MisalignedDimension {
                axis: "N",
                value: self.n,
                block: BLOCK,
            });
        }
        Ok(())
    }
}

impl fmt::Display for GemmShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.m, self.n, self.k)
    }
}

/// The one configuration documented for the reference kernel
pub const REFERENCE_SHAPE: GemmShape = GemmShape::new(1024, 1536, 7168);

/// Ordered set of supported (M, N, K) triples
///
/// Every entry is positive and block-aligned; `insert` enforces it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShapeRegistry {
    shapes: BTreeSet<GemmShape>,
}

impl ShapeRegistry {
    /// Empty registry (rejects everything)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding only [`REFERENCE_SHAPE`]
    #[must_use]
    pub fn reference() -> Self {
        let mut shapes = BTreeSet::new();
        shapes.insert(REFERENCE_SHAPE);
        Self { shapes }
    }

    /// Build a registry from a list of shapes
    ///
    /// # Errors
    ///
    /// Returns the first alignment error among `shapes`.
    pub fn from_shapes<I>(shapes: I) -> Result<Self>
    where
        I: IntoIterator<Item = GemmShape>,
    {
        let mut registry = Self::new();
        for shape in shapes {
            registry.insert(shape)?;
        }
        Ok(registry)
    }

    /// Add a shape. Returns `true` if it was not present.
    ///
    /// # Errors
    ///
    /// Rejects zero-sized or misaligned shapes.
    pub fn insert(&mut self, shape: GemmShape) -> Result<bool> {
        shape.check_alignment()?;
        Ok(self.shapes.insert(shape))
    }

    /// Remove a shape. Returns `true` if it was present.
    pub fn remove(&mut self, shape: &GemmShape) -> bool {
        self.shapes.remove(shape)
    }

    /// Whether `shape` is supported
    #[must_use]
    pub fn contains(&self, shape: &GemmShape) -> bool {
        self.shapes.contains(shape)
    }

    /// Predicate form of [`contains`](Self::contains)
    #[must_use]
    pub fn is_supported(&self, m: usize, n: usize, k: usize) -> bool {
        self.contains(&GemmShape::new(m, n, k))
    }

    /// Iterate shapes in (M, N, K) order
    pub fn iter(&self) -> impl Iterator<Item = &GemmShape> {
        self.shapes.iter()
    }

    /// Number of supported shapes
    #[must_use]
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    /// True when no shape is supported
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_block_counts() {
        let shape = GemmShape::new(1024, 1536, 7168);
        assert_eq!(shape.k_blocks(), 56);
        assert_eq!(shape.n_blocks(), 12);
        assert_eq!(shape.macs(), 1024 * 1536 * 7168);
        assert_eq!(shape.to_string(), "1024x1536x7168");
    }

    #[test]
    fn test_macs_saturates() {
        let huge = GemmShape::new(usize::MAX / 2, 1 << 20, 1 << 20);
        assert_eq!(huge.macs(), usize::MAX);
    }

    #[test]
    fn test_shape_alignment_ok() {
        assert!(GemmShape::new(1, 128, 128).check_alignment().is_ok());
        // M has no alignment requirement
        assert!(GemmShape::new(77, 256, 384).check_alignment().is_ok());
    }

    #[test]
    fn test_shape_alignment_rejects_k() {
        let err = GemmShape::new(128, 256, 200).check_alignment().unwrap_err();
        assert!(matches!(
            err,
            EscalarError::MisalignedDimension { axis: "K", value: 200, .. }
        ));
    }

    #[test]
    fn test_shape_alignment_rejects_n() {
        let err = GemmShape::new(128, 100, 256).check_alignment().unwrap_err();
        assert!(matches!(
            err,
            EscalarError::MisalignedDimension { axis: "N", value: 100, .. }
        ));
    }

    #[test]
    fn test_shape_alignment_rejects_zero() {
        let err = GemmShape::new(0, 128, 128).check_alignment().unwrap_err();
        assert!(matches!(err, EscalarError::InvalidShape { .. }));
    }

    #[test]
    fn test_registry_reference() {
        let registry = ShapeRegistry::reference();
        assert_eq!(registry.len(), 1);
        assert!(registry.is_supported(1024, 1536, 7168));
        assert!(!registry.is_supported(1536, 1024, 7168));
    }

    #[test]
    fn test_registry_insert_and_enumerate() {
        let mut registry = ShapeRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.insert(GemmShape::new(256, 128, 128)).unwrap());
        assert!(registry.insert(GemmShape::new(128, 256, 256)).unwrap());
        assert!(!registry.insert(GemmShape::new(128, 256, 256)).unwrap());

        let listed: Vec<GemmShape> = registry.iter().copied().collect();
        assert_eq!(
            listed,
            vec![GemmShape::new(128, 256, 256), GemmShape::new(256, 128, 128)]
        );
    }

    #[test]
    fn test_registry_rejects_misaligned_entries() {
        let mut registry = ShapeRegistry::new();
        assert!(registry.insert(GemmShape::new(128, 128, 100)).is_err());
        assert!(registry.is_empty());

        let result = ShapeRegistry::from_shapes([
            GemmShape::new(128, 128, 128),
            GemmShape::new(128, 64, 128),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_registry_remove() {
        let mut registry = ShapeRegistry::reference();
        assert!(registry.remove(&REFERENCE_SHAPE));
        assert!(!registry.contains(&REFERENCE_SHAPE));
    }

    #[test]
    fn test_shape_serde_roundtrip_json() {
        let json = r#"{"m":128,"n":256,"k":256}"#;
        let shape: GemmShape = serde_json::from_str(json).unwrap();
        assert_eq!(shape, GemmShape::new(128, 256, 256));
    }
}

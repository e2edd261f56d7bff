//! Borrowed views over caller-owned buffers
//!
//! All views are dense and row-major. A view only records the declared
//! shape; the engine checks the backing length before using it.

use half::bf16;

use crate::error::{EscalarError, Result};
use crate::format::Fp8E4M3Fnuz;

/// FP8 operand, `rows x cols`, element `(r, c)` at `r * cols + c`
///
/// For both A and B `rows` is K.
#[derive(Debug, Clone, Copy)]
pub struct Fp8Matrix<'a> {
    data: &'a [Fp8E4M3Fnuz],
    rows: usize,
    cols: usize,
}

impl<'a> Fp8Matrix<'a> {
    /// Wrap a buffer with a declared shape
    #[must_use]
    pub fn new(data: &'a [Fp8E4M3Fnuz], rows: usize, cols: usize) -> Self {
        Self { data, rows, cols }
    }

    /// Wrap raw FP8 bytes with a declared shape
    #[must_use]
    pub fn from_bits(bits: &'a [u8], rows: usize, cols: usize) -> Self {
        Self::new(Fp8E4M3Fnuz::slice_from_bits(bits), rows, cols)
    }

    /// Backing buffer
    #[must_use]
    pub fn data(&self) -> &'a [Fp8E4M3Fnuz] {
        self.data
    }

    /// Declared rows
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Declared columns
    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Element `(r, c)`; caller guarantees bounds
    #[inline]
    #[must_use]
    pub fn get(&self, r: usize, c: usize) -> Fp8E4M3Fnuz {
        self.data[r * self.cols + c]
    }

    pub(crate) fn check_len(&self, name: &'static str) -> Result<()> {
        check_len(name, self.data.len(), self.rows, self.cols)
    }
}

/// f32 scale factors, `rows x cols`, row-major
#[derive(Debug, Clone, Copy)]
pub struct ScaleMatrix<'a> {
    data: &'a [f32],
    rows: usize,
    cols: usize,
}

impl<'a> ScaleMatrix<'a> {
    /// Wrap a buffer with a declared shape
    #[must_use]
    pub fn new(data: &'a [f32], rows: usize, cols: usize) -> Self {
        Self { data, rows, cols }
    }

    /// Backing buffer
    #[must_use]
    pub fn data(&self) -> &'a [f32] {
        self.data
    }

    /// Declared rows
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Declared columns
    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Element `(r, c)`; caller guarantees bounds
    #[inline]
    #[must_use]
    pub fn get(&self, r: usize, c: usize) -> f32 {
        self.data[r * self.cols + c]
    }

    pub(crate) fn check_len(&self, name: &'static str) -> Result<()> {
        check_len(name, self.data.len(), self.rows, self.cols)
    }
}

/// Writable bf16 output, `rows x cols`, row-major
#[derive(Debug)]
pub struct OutputMatrix<'a> {
    data: &'a mut [bf16],
    rows: usize,
    cols: usize,
}

impl<'a> OutputMatrix<'a> {
    /// Wrap a buffer with a declared shape
    pub fn new(data: &'a mut [bf16], rows: usize, cols: usize) -> Self {
        Self { data, rows, cols }
    }

    /// Declared rows
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Declared columns
    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Read-only access to the buffer
    #[must_use]
    pub fn data(&self) -> &[bf16] {
        self.data
    }

    /// Element `(r, c)`; caller guarantees bounds
    #[inline]
    #[must_use]
    pub fn get(&self, r: usize, c: usize) -> bf16 {
        self.data[r * self.cols + c]
    }

    pub(crate) fn check_len(&self, name: &'static str) -> Result<()> {
        check_len(name, self.data.len(), self.rows, self.cols)
    }

    /// The `rows * cols` prefix the engine writes
    pub(crate) fn active_mut(&mut self) -> &mut [bf16] {
        let len = self.rows * self.cols;
        &mut self.data[..len]
    }
}

fn check_len(name: &'static str, actual: usize, rows: usize, cols: usize) -> Result<()> {
    let needed = rows
        .checked_mul(cols)
        .ok_or_else(|| EscalarError::InvalidShape {
            reason: format!("`{name}` shape {rows}x{cols} overflows usize"),
        })?;
    if actual < needed {
        return Err(EscalarError::BufferTooSmall {
            buffer: name,
            needed,
            actual,
        });
    }
    Ok(())
}

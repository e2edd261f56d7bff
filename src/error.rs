//! Error types for Escalar
//!
//! Every error is raised synchronously, before the engine touches the
//! output buffer. A failed call leaves `C` exactly as the caller passed it.

use thiserror::Error;

use crate::shape::GemmShape;

/// Result type alias for Escalar operations
pub type Result<T> = std::result::Result<T, EscalarError>;

/// Errors that can occur in Escalar operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EscalarError {
    /// Zero-sized dimension or dimension mismatch between buffers
    #[error("Invalid shape: {reason}")]
    InvalidShape {
        /// Description of the mismatch
        reason: String,
    },

    /// A dimension that must be a whole number of quantization blocks is not
    #[error("{axis} = {value} is not a multiple of the quantization block size {block}")]
    MisalignedDimension {
        /// Axis name (`K` or `N`)
        axis: &'static str,
        /// Offending dimension
        value: usize,
        /// Required block size
        block: usize,
    },

    /// (M, N, K) triple is not in the supported shape table
    #[error("Unsupported GEMM shape {shape}: not in the supported shape table")]
    UnsupportedShape {
        /// Rejected shape
        shape: GemmShape,
    },

    /// Buffer holds fewer elements than its declared shape requires
    #[error("Buffer `{buffer}` too small: need {needed} elements, have {actual}")]
    BufferTooSmall {
        /// Buffer name (`A`, `B`, `A_scale`, `B_scale`, `C`)
        buffer: &'static str,
        /// Elements required by the declared shape
        needed: usize,
        /// Elements actually present
        actual: usize,
    },

    /// NaN FP8 code or non-finite scale factor
    #[error("Non-finite value in `{buffer}` at element {index}")]
    NonFiniteInput {
        /// Buffer name
        buffer: &'static str,
        /// Flat element index of the first offending value
        index: usize,
    },

    /// Engine configuration is invalid
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Configuration document could not be parsed
    #[error("Format error: {reason}")]
    FormatError {
        /// Parser message
        reason: String,
    },

    /// Configuration file could not be read
    #[error("I/O error: {message}")]
    IoError {
        /// Error message
        message: String,
    },
}

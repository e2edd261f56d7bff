//! Engine configuration
//!
//! A [`GemmConfig`] fixes the tiling, the parallel dispatch policy, the
//! non-finite input policy and the supported shape table. It is read once when
//! the engine is built; individual calls take no options.
//!
//! ## Sources
//!
//! - Code: `GemmConfig::default()` plus `with_*` builders
//! - JSON: [`GemmConfig::from_json_str`] / [`GemmConfig::from_file`]
//! - Environment: [`GemmConfig::from_env`]
//!
//! ## Environment variables
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `ESCALAR_CONFIG` | Path to a JSON config file used as the base |
//! | `ESCALAR_NUM_THREADS` | Dedicated thread pool size |
//! | `ESCALAR_NON_FINITE` | `reject` or `propagate` |

use std::env::VarError;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EscalarError, Result};
use crate::shape::{GemmShape, ShapeRegistry, BLOCK, REFERENCE_SHAPE};

/// Environment variable naming a JSON config file
pub const CONFIG_PATH_ENV: &str = "ESCALAR_CONFIG";
/// Environment variable overriding `num_threads`
pub const NUM_THREADS_ENV: &str = "ESCALAR_NUM_THREADS";
/// Environment variable overriding `non_finite`
pub const NON_FINITE_ENV: &str = "ESCALAR_NON_FINITE";

/// What the engine does with NaN FP8 codes and non-finite scales
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonFinitePolicy {
    /// Scan inputs before computing and fail with `NonFiniteInput`
    #[default]
    Reject,
    /// Skip the scan; NaN/inf flow through IEEE arithmetic into C
    Propagate,
}

impl NonFinitePolicy {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "propagate" => Ok(Self::Propagate),
            other => Err(EscalarError::InvalidConfiguration(format!(
                "{NON_FINITE_ENV} must be `reject` or `propagate`, got `{other}`"
            ))),
        }
    }
}

/// Configuration for [`BlockScaledGemm`](crate::gemm::BlockScaledGemm)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GemmConfig {
    /// Output rows per tile (and per parallel work unit)
    pub tile_m: usize,
    /// Output columns per tile; must divide [`BLOCK`] or be a multiple of it
    pub tile_n: usize,
    /// Problems below this many multiply-accumulates run on the caller thread
    pub parallel_threshold: usize,
    /// Size of a dedicated thread pool; `None` uses rayon's global pool
    pub num_threads: Option<usize>,
    /// Non-finite input policy
    pub non_finite: NonFinitePolicy,
    /// Supported (M, N, K) triples
    pub supported_shapes: Vec<GemmShape>,
}

impl Default for GemmConfig {
    fn default() -> Self {
        Self {
            tile_m: 64,
            tile_n: BLOCK,
            parallel_threshold: 1 << 20,
            num_threads: None,
            non_finite: NonFinitePolicy::Reject,
            supported_shapes: vec![REFERENCE_SHAPE],
        }
    }
}

impl GemmConfig {
    /// Default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set rows per tile
    #[must_use]
    pub fn with_tile_m(mut self, tile_m: usize) -> Self {
        self.tile_m = tile_m;
        self
    }

    /// Set columns per tile
    #[must_use]
    pub fn with_tile_n(mut self, tile_n: usize) -> Self {
        self.tile_n = tile_n;
        self
    }

    /// Set the sequential/parallel cut-over in multiply-accumulates
    #[must_use]
    pub fn with_parallel_threshold(mut self, macs: usize) -> Self {
        self.parallel_threshold = macs;
        self
    }

    /// Use a dedicated pool of `n` threads
    #[must_use]
    pub fn with_num_threads(mut self, n: usize) -> Self {
        self.num_threads = Some(n);
        self
    }

    /// Set the non-finite input policy
    #[must_use]
    pub fn with_non_finite(mut self, policy: NonFinitePolicy) -> Self {
        self.non_finite = policy;
        self
    }

    /// Replace the supported shape list
    #[must_use]
    pub fn with_supported_shapes(mut self, shapes: Vec<GemmShape>) -> Self {
        self.supported_shapes = shapes;
        self
    }

    /// Append one supported shape
    #[must_use]
    pub fn with_supported_shape(mut self, shape: GemmShape) -> Self {
        self.supported_shapes.push(shape);
        self
    }

    /// Check tiling and thread settings
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` for zero tiles, a `tile_n` that neither
    /// divides nor is a multiple of [`BLOCK`], or a zero thread count, and
    /// propagates alignment errors from `supported_shapes`.
    pub fn validate(&self) -> Result<()> {
        if self.tile_m == 0 {
            return Err(EscalarError::InvalidConfiguration(
                "tile_m must be positive".to_string(),
            ));
        }
        if self.tile_n == 0 || (BLOCK % self.tile_n != 0 && self.tile_n % BLOCK != 0) {
            return Err(EscalarError::InvalidConfiguration(format!(
                "tile_n = {} must divide or be a multiple of the block size {BLOCK}",
                self.tile_n
            )));
        }
        if self.num_threads == Some(0) {
            return Err(EscalarError::InvalidConfiguration(
                "num_threads must be positive".to_string(),
            ));
        }
        self.registry().map(|_| ())
    }

    /// Build the shape table described by `supported_shapes`
    ///
    /// # Errors
    ///
    /// Fails if any listed shape is zero-sized or misaligned.
    pub fn registry(&self) -> Result<ShapeRegistry> {
        ShapeRegistry::from_shapes(self.supported_shapes.iter().copied())
    }

    /// Parse a JSON document. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `FormatError` on malformed JSON and validation errors otherwise.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| EscalarError::FormatError {
            reason: format!("Failed to parse GEMM config: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON config file
    ///
    /// # Errors
    ///
    /// Returns `IoError` if the file cannot be read, then as
    /// [`from_json_str`](Self::from_json_str).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| EscalarError::IoError {
            message: format!("Failed to read GEMM config {}: {e}", path.display()),
        })?;
        Self::from_json_str(&text)
    }

    /// Serialize to pretty JSON
    ///
    /// # Errors
    ///
    /// Returns `FormatError` if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| EscalarError::FormatError {
            reason: format!("Failed to serialize GEMM config: {e}"),
        })
    }

    /// Load from the environment
    ///
    /// Starts from the file named by `ESCALAR_CONFIG` (or the defaults), then
    /// applies `ESCALAR_NUM_THREADS` and `ESCALAR_NON_FINITE`.
    ///
    /// # Errors
    ///
    /// Propagates file, parse and validation errors, and rejects unparsable
    /// override values.
    pub fn from_env() -> Result<Self> {
        let mut config = match env_var(CONFIG_PATH_ENV)? {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(value) = env_var(NUM_THREADS_ENV)? {
            let n: usize = value.trim().parse().map_err(|_| {
                EscalarError::InvalidConfiguration(format!(
                    "{NUM_THREADS_ENV} must be a positive integer, got `{value}`"
                ))
            })?;
            config.num_threads = Some(n);
        }
        if let Some(value) = env_var(NON_FINITE_ENV)? {
            config.non_finite = NonFinitePolicy::parse(&value)?;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Unset is `None`; a set but non-Unicode value is an error
fn env_var(name: &str) -> Result<Option<String>> {
    match std::env::var(name) {
        Ok(value) => Ok(Some(value)),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(raw)) => Err(EscalarError::InvalidConfiguration(format!(
            "{name} is not valid Unicode: {raw:?}"
        ))),
    }
}

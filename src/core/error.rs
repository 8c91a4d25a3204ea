//! Error types for Pixelsmith.
//!
//! Uses thiserror for structured errors with context. Errors are split by how
//! far they are allowed to travel:
//! - [`ProcessingError`] stays inside one item and is caught by the scheduler
//! - [`BatchError`] is the only thing that can fail a whole batch call
//! - [`ConfigError`] comes from loading or validating configuration

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for Pixelsmith.
///
/// This enum encompasses all error categories and enables automatic
/// conversion between specific error types.
#[derive(Error, Debug)]
pub enum PixelsmithError {
    #[error("Processing error: {0}")]
    Processing(#[from] ProcessingError),

    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Failures confined to a single source item.
///
/// The scheduler records these against the item and moves on to the next one.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail")]
pub enum ProcessingError {
    /// The input bytes could not be interpreted as an image.
    #[error("Failed to decode '{file}': {reason}")]
    Decode { file: String, reason: String },

    /// The target container is unsupported or the encoder failed.
    #[error("Failed to encode {format}: {reason}")]
    Encoding { format: String, reason: String },

    /// A drawing surface could not be produced for the item.
    #[error("Drawing surface unavailable: {0}")]
    Context(String),

    /// An execution context replied with an error, or never replied.
    #[error("Worker {worker} failed: {reason}")]
    PoolDispatch { worker: usize, reason: String },
}

/// Errors that fail an entire batch call.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Invalid processing options: {0}")]
    InvalidOptions(String),

    #[error("Invalid batch configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to build batch thread pool: {0}")]
    ThreadPool(String),
}

/// Errors from loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for '{field}': {reason}")]
    Invalid { field: String, reason: String },
}

// ============================================================================
// Error Utilities
// ============================================================================

impl ProcessingError {
    /// Build a decode error for the named item.
    pub fn decode(file: impl Into<String>, reason: impl ToString) -> Self {
        ProcessingError::Decode {
            file: file.into(),
            reason: reason.to_string(),
        }
    }

    /// Build an encoding error for the named container.
    pub fn encoding(format: impl Into<String>, reason: impl ToString) -> Self {
        ProcessingError::Encoding {
            format: format.into(),
            reason: reason.to_string(),
        }
    }

    /// Short machine-friendly tag for logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessingError::Decode { .. } => "decode",
            ProcessingError::Encoding { .. } => "encoding",
            ProcessingError::Context(_) => "context",
            ProcessingError::PoolDispatch { .. } => "pool_dispatch",
        }
    }

    /// Whether running the same item again could succeed.
    ///
    /// Only dispatch failures qualify: the pool is rebuilt on the next run.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProcessingError::PoolDispatch { .. })
    }

    /// Get suggestion for fixing this error.
    pub fn suggested_fix(&self) -> Option<String> {
        match self {
            ProcessingError::Decode { file, .. } => {
                Some(format!("Check that '{}' is a complete, supported image", file))
            }
            ProcessingError::Encoding { format, .. } => {
                Some(format!("Pick a target format other than {}", format))
            }
            ProcessingError::PoolDispatch { .. } => {
                Some("Retry the batch; the worker pool is recreated on demand".to_string())
            }
            ProcessingError::Context(_) => None,
        }
    }
}

impl ConfigError {
    /// Build a validation error for a named field.
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for Pixelsmith operations.
pub type PixelsmithResult<T> = Result<T, PixelsmithError>;

/// Result type alias for per-item operations.
pub type ProcessingResult<T> = Result<T, ProcessingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_suggestion() {
        let error = ProcessingError::decode("broken.jpg", "unexpected EOF");
        assert_eq!(error.kind(), "decode");
        assert!(error.suggested_fix().unwrap().contains("broken.jpg"));
        assert!(error.to_string().contains("unexpected EOF"));
    }

    #[test]
    fn test_errors_convert_upwards() {
        let context = ProcessingError::Context("no surface".to_string());
        assert!(!context.is_retryable());
        let err: PixelsmithError = context.into();
        assert!(matches!(err, PixelsmithError::Processing(_)));

        let err: BatchError = ConfigError::invalid("batch_size", "must be at least 1").into();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn test_processing_error_serializes_with_kind_tag() {
        let error = ProcessingError::PoolDispatch {
            worker: 2,
            reason: "terminated".to_string(),
        };
        let json = serde_json::to_string(&error).unwrap();
        assert!(json.contains("PoolDispatch"));
        let back: ProcessingError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, error);
    }
}

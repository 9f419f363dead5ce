//! Error types for driver operations.

use pyramid_common::PyramidError;
use renderer::PngError;
use storage::StorageError;
use thiserror::Error;

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, FormatError>;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Output metadata conflict on '{field}': existing {existing}, current {current}")]
    Conflict {
        field: String,
        existing: String,
        current: String,
    },

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("No suitable zoom level found between {min} and {max}")]
    NoSuitableZoom { min: u32, max: u32 },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Pyramid error: {0}")]
    Pyramid(#[from] PyramidError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("PNG error: {0}")]
    Png(#[from] PngError),

    #[error("Upstream process failed: {0}")]
    Upstream(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl FormatError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding(msg.into())
    }

    pub fn conflict(field: impl Into<String>, existing: impl ToString, current: impl ToString) -> Self {
        Self::Conflict {
            field: field.into(),
            existing: existing.to_string(),
            current: current.to_string(),
        }
    }

    /// Invalid configuration, raised before any I/O.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Pyramid(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Payload could not be encoded or decoded.
    pub fn is_encoding(&self) -> bool {
        matches!(self, Self::Encoding(_) | Self::Png(_))
    }
}

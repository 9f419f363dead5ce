//! Error types for process configuration and execution.

use formats::FormatError;
use pyramid_common::PyramidError;
use thiserror::Error;

/// Result type alias for process operations.
pub type Result<T> = std::result::Result<T, ProcessError>;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Invalid process configuration: {0}")]
    Config(String),

    #[error("Failed to read process file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse process file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("Pyramid error: {0}")]
    Pyramid(#[from] PyramidError),

    #[error("Process function failed: {0}")]
    Function(String),
}

impl ProcessError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn function(msg: impl Into<String>) -> Self {
        Self::Function(msg.into())
    }

    pub fn is_config(&self) -> bool {
        match self {
            Self::Config(_) | Self::Yaml(_) | Self::Pyramid(_) => true,
            Self::Format(e) => e.is_config(),
            _ => false,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Format(e) if e.is_conflict())
    }
}

/// Process failures seen through the driver layer, e.g. by a chained input.
impl From<ProcessError> for FormatError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::Format(e) => e,
            other => FormatError::Upstream(Box::new(other)),
        }
    }
}

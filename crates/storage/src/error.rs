//! Storage error types.
//!
//! "Not found" is not an error here; reads report it through
//! [`ReadOutcome::NotFound`](crate::ReadOutcome).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage backend error on {path}: {source}")]
    Backend {
        path: String,
        #[source]
        source: object_store::Error,
    },

    #[error("Invalid storage URI: {0}")]
    InvalidUri(String),

    #[error("{0} is read-only")]
    ReadOnly(String),
}

impl StorageError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn backend(path: impl Into<String>, source: object_store::Error) -> Self {
        Self::Backend {
            path: path.into(),
            source,
        }
    }
}

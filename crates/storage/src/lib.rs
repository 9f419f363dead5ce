//! Storage backends for tile pyramids.
//!
//! Paths are classified by prefix:
//! - local filesystem paths (read/write)
//! - `http://` / `https://` URLs (read-only)
//! - `s3://bucket/key` URIs (read/write)

pub mod backend;
pub mod config;
pub mod error;
pub mod path;

pub use backend::{ReadOutcome, StorageBackend};
pub use config::ObjectStorageConfig;
pub use error::{Result, StorageError};
pub use path::Scheme;

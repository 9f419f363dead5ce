//! Per-driver logging and storage context.

use storage::ObjectStorageConfig;
use tracing::Span;

/// Context handed to every driver at construction.
///
/// Driver events are emitted under `span`, so each configured output or
/// input logs with its own path. `storage` holds the object storage settings
/// used when the driver opens its backend.
#[derive(Debug, Clone)]
pub struct DriverContext {
    pub span: Span,
    pub storage: ObjectStorageConfig,
}

impl DriverContext {
    pub fn new(span: Span, storage: ObjectStorageConfig) -> Self {
        Self { span, storage }
    }

    /// Context for an output location.
    pub fn output(path: &str, storage: ObjectStorageConfig) -> Self {
        Self::new(tracing::info_span!("output", path = %path), storage)
    }

    /// Context for a named process input.
    pub fn input(name: &str, path: &str, storage: ObjectStorageConfig) -> Self {
        Self::new(tracing::info_span!("input", name = %name, path = %path), storage)
    }

    /// Context with a disabled span and default storage settings.
    pub fn detached() -> Self {
        Self::new(Span::none(), ObjectStorageConfig::default())
    }
}

//! Error types for pyramid and tile operations.

use thiserror::Error;

/// Result type alias using PyramidError.
pub type PyramidResult<T> = Result<T, PyramidError>;

#[derive(Debug, Error)]
pub enum PyramidError {
    #[error("Invalid grid definition: {0}")]
    InvalidGrid(String),

    #[error("Invalid metatiling {0}: must be one of 1, 2, 4, 8, 16")]
    InvalidMetatiling(u32),

    #[error("Tile ({zoom}, {row}, {col}) is outside the pyramid at zoom {zoom}")]
    TileOutOfRange { zoom: u32, row: u32, col: u32 },

    #[error("Invalid bounds: {0}")]
    InvalidBounds(String),

    #[error("Unsupported CRS: {0}")]
    UnsupportedCrs(String),

    #[error("Cannot transform coordinates from {from} to {to}")]
    UnsupportedTransform { from: String, to: String },
}

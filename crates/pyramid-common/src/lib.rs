//! Common types shared by the tile pyramid crates.
//!
//! - [`GridDefinition`]: the zoom-0 layout of a tiling scheme over one CRS
//! - [`TilePyramid`]: a grid plus metatiling and pixelbuffer
//! - [`Tile`]: one addressable `(zoom, row, col)` unit of a pyramid

pub mod bbox;
pub mod crs;
pub mod error;
pub mod grid;
pub mod tile;

pub use bbox::BoundingBox;
pub use crs::CrsCode;
pub use error::{PyramidError, PyramidResult};
pub use grid::{GridDefinition, GridType};
pub use tile::{Tile, TileId, TilePyramid, MAX_ZOOM, TILE_SIZE};

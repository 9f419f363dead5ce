//! Tile pyramids and tiles with metatiling and pixelbuffer.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{BoundingBox, CrsCode, GridDefinition, PyramidError, PyramidResult};

/// Default tile size in pixels.
pub const TILE_SIZE: u32 = 256;

/// Deepest addressable zoom; the geodetic matrix width then still fits a u32.
pub const MAX_ZOOM: u32 = 30;

const VALID_METATILING: [u32; 5] = [1, 2, 4, 8, 16];

/// Tolerance used when snapping bounds to tile edges.
const EDGE_EPSILON: f64 = 1e-9;

/// Tile identity within a pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileId {
    pub zoom: u32,
    pub row: u32,
    pub col: u32,
}

impl TileId {
    pub fn new(zoom: u32, row: u32, col: u32) -> Self {
        Self { zoom, row, col }
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.zoom, self.row, self.col)
    }
}

/// North-up pixel grid transform: `x = left + col * pixel_x_size`,
/// `y = top - row * pixel_y_size`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine {
    pub pixel_x_size: f64,
    pub pixel_y_size: f64,
    pub left: f64,
    pub top: f64,
}

impl Affine {
    /// CRS coordinates of a pixel center.
    pub fn pixel_center(&self, col: usize, row: usize) -> (f64, f64) {
        (
            self.left + (col as f64 + 0.5) * self.pixel_x_size,
            self.top - (row as f64 + 0.5) * self.pixel_y_size,
        )
    }

    /// Fractional `(col, row)` of a CRS coordinate.
    pub fn pixel_of(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.left) / self.pixel_x_size,
            (self.top - y) / self.pixel_y_size,
        )
    }
}

/// A grid with tile size, metatiling and pixelbuffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TilePyramid {
    pub grid: GridDefinition,
    pub tile_size: u32,
    pub metatiling: u32,
    pub pixelbuffer: u32,
}

impl TilePyramid {
    pub fn new(grid: GridDefinition, metatiling: u32, pixelbuffer: u32) -> PyramidResult<Self> {
        if !VALID_METATILING.contains(&metatiling) {
            return Err(PyramidError::InvalidMetatiling(metatiling));
        }
        Ok(Self {
            grid,
            tile_size: TILE_SIZE,
            metatiling,
            pixelbuffer,
        })
    }

    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size.max(1);
        self
    }

    pub fn crs(&self) -> CrsCode {
        self.grid.crs
    }

    /// Number of tile rows at `zoom`, saturating at `u32::MAX`.
    pub fn matrix_height(&self, zoom: u32) -> u32 {
        self.matrix_size(self.grid.rows(), zoom)
    }

    /// Number of tile columns at `zoom`, saturating at `u32::MAX`.
    pub fn matrix_width(&self, zoom: u32) -> u32 {
        self.matrix_size(self.grid.cols(), zoom)
    }

    fn matrix_size(&self, base_tiles: u32, zoom: u32) -> u32 {
        let scale = 1u64.checked_shl(zoom).unwrap_or(u64::MAX);
        let base = (base_tiles as u64).saturating_mul(scale);
        u32::try_from(base.div_ceil(self.metatiling as u64)).unwrap_or(u32::MAX)
    }

    pub fn pixel_x_size(&self, zoom: u32) -> f64 {
        self.grid.bounds.width()
            / (self.grid.cols() as f64 * 2f64.powi(zoom as i32) * self.tile_size as f64)
    }

    pub fn pixel_y_size(&self, zoom: u32) -> f64 {
        self.grid.bounds.height()
            / (self.grid.rows() as f64 * 2f64.powi(zoom as i32) * self.tile_size as f64)
    }

    /// Width of a (meta)tile in CRS units.
    pub fn tile_x_size(&self, zoom: u32) -> f64 {
        self.pixel_x_size(zoom) * (self.tile_size * self.metatiling) as f64
    }

    /// Height of a (meta)tile in CRS units.
    pub fn tile_y_size(&self, zoom: u32) -> f64 {
        self.pixel_y_size(zoom) * (self.tile_size * self.metatiling) as f64
    }

    /// Tile at `(zoom, row, col)`, rejecting indexes outside the matrix.
    pub fn tile(&self, zoom: u32, row: u32, col: u32) -> PyramidResult<Tile> {
        if zoom > MAX_ZOOM || row >= self.matrix_height(zoom) || col >= self.matrix_width(zoom) {
            return Err(PyramidError::TileOutOfRange { zoom, row, col });
        }
        Ok(Tile {
            id: TileId::new(zoom, row, col),
            pyramid: self.clone(),
        })
    }

    /// Tiles of this pyramid at `tile.zoom` covering the buffered footprint
    /// of `tile`, in row-major order.
    pub fn intersecting(&self, tile: &Tile) -> Vec<Tile> {
        self.tiles_from_bounds(&tile.buffered_bounds(), tile.id.zoom)
    }

    /// Tiles of this pyramid at `tile.zoom` overlapping the unbuffered
    /// footprint of `tile`.
    pub fn covered_by(&self, tile: &Tile) -> Vec<Tile> {
        self.tiles_from_bounds(&tile.bounds(), tile.id.zoom)
    }

    /// All tiles at `zoom` whose unbuffered bounds intersect `bounds`.
    pub fn tiles_from_bounds(&self, bounds: &BoundingBox, zoom: u32) -> Vec<Tile> {
        let grid = &self.grid.bounds;
        if !grid.intersects(bounds) {
            return Vec::new();
        }

        let tile_x = self.tile_x_size(zoom);
        let tile_y = self.tile_y_size(zoom);
        let max_col = self.matrix_width(zoom) as i64 - 1;
        let max_row = self.matrix_height(zoom) as i64 - 1;

        let col_min = ((bounds.min_x - grid.min_x) / tile_x + EDGE_EPSILON).floor() as i64;
        let col_max = ((bounds.max_x - grid.min_x) / tile_x - EDGE_EPSILON).ceil() as i64 - 1;
        let row_min = ((grid.max_y - bounds.max_y) / tile_y + EDGE_EPSILON).floor() as i64;
        let row_max = ((grid.max_y - bounds.min_y) / tile_y - EDGE_EPSILON).ceil() as i64 - 1;

        let (col_min, col_max) = (col_min.max(0), col_max.min(max_col));
        let (row_min, row_max) = (row_min.max(0), row_max.min(max_row));

        let mut tiles = Vec::new();
        for row in row_min..=row_max {
            for col in col_min..=col_max {
                let tile = Tile {
                    id: TileId::new(zoom, row as u32, col as u32),
                    pyramid: self.clone(),
                };
                if tile.bounds().intersects(bounds) {
                    tiles.push(tile);
                }
            }
        }
        tiles
    }
}

/// One tile of a [`TilePyramid`].
///
/// Geometry is derived from the pyramid on demand. Buffered bounds always
/// contain the unbuffered bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    pub id: TileId,
    pub pyramid: TilePyramid,
}

impl Tile {
    pub fn zoom(&self) -> u32 {
        self.id.zoom
    }

    pub fn row(&self) -> u32 {
        self.id.row
    }

    pub fn col(&self) -> u32 {
        self.id.col
    }

    pub fn crs(&self) -> CrsCode {
        self.pyramid.crs()
    }

    pub fn pixelbuffer(&self) -> u32 {
        self.pyramid.pixelbuffer
    }

    pub fn pixel_x_size(&self) -> f64 {
        self.pyramid.pixel_x_size(self.id.zoom)
    }

    pub fn pixel_y_size(&self) -> f64 {
        self.pyramid.pixel_y_size(self.id.zoom)
    }

    /// Footprint without pixelbuffer, clipped to the grid.
    pub fn bounds(&self) -> BoundingBox {
        let grid = &self.pyramid.grid.bounds;
        let tile_x = self.pyramid.tile_x_size(self.id.zoom);
        let tile_y = self.pyramid.tile_y_size(self.id.zoom);

        let left = grid.min_x + self.id.col as f64 * tile_x;
        let top = grid.max_y - self.id.row as f64 * tile_y;
        BoundingBox::new(
            left,
            (top - tile_y).max(grid.min_y),
            (left + tile_x).min(grid.max_x),
            top,
        )
    }

    /// Footprint grown by `pixelbuffer` pixels on every side.
    pub fn buffered_bounds(&self) -> BoundingBox {
        let pb = self.pyramid.pixelbuffer as f64;
        self.bounds()
            .buffered(pb * self.pixel_x_size(), pb * self.pixel_y_size())
    }

    /// Pixel width including pixelbuffer.
    pub fn width(&self) -> usize {
        let unbuffered = (self.bounds().width() / self.pixel_x_size()).round() as usize;
        unbuffered + 2 * self.pyramid.pixelbuffer as usize
    }

    /// Pixel height including pixelbuffer.
    pub fn height(&self) -> usize {
        let unbuffered = (self.bounds().height() / self.pixel_y_size()).round() as usize;
        unbuffered + 2 * self.pyramid.pixelbuffer as usize
    }

    /// `(height, width)` in pixels.
    pub fn shape(&self) -> (usize, usize) {
        (self.height(), self.width())
    }

    /// Transform of the buffered pixel grid.
    pub fn affine(&self) -> Affine {
        let buffered = self.buffered_bounds();
        Affine {
            pixel_x_size: self.pixel_x_size(),
            pixel_y_size: self.pixel_y_size(),
            left: buffered.min_x,
            top: buffered.max_y,
        }
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.id.fmt(f)
    }
}

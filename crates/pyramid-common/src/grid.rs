//! Grid definitions: the zoom-0 tile layout of a tiling scheme.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{BoundingBox, CrsCode, PyramidError, PyramidResult};

/// Half the Web Mercator world width in meters.
pub const MERCATOR_EXTENT: f64 = 20_037_508.342_789_2;

/// Kind of tiling grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GridType {
    /// EPSG:4326, two zoom-0 tiles side by side
    Geodetic,
    /// EPSG:3857, one square zoom-0 tile
    Mercator,
    /// User-supplied shape, bounds and CRS
    Custom,
}

impl fmt::Display for GridType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GridType::Geodetic => "geodetic",
            GridType::Mercator => "mercator",
            GridType::Custom => "custom",
        };
        f.write_str(name)
    }
}

/// Zoom-0 layout of a grid.
///
/// `shape` is `(rows, cols)` of tiles at zoom 0. Every zoom level doubles
/// both dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridDefinition {
    pub grid_type: GridType,
    pub shape: (u32, u32),
    pub bounds: BoundingBox,
    pub is_global: bool,
    pub crs: CrsCode,
}

impl GridDefinition {
    pub fn geodetic() -> Self {
        Self {
            grid_type: GridType::Geodetic,
            shape: (1, 2),
            bounds: BoundingBox::new(-180.0, -90.0, 180.0, 90.0),
            is_global: true,
            crs: CrsCode::Epsg4326,
        }
    }

    pub fn mercator() -> Self {
        Self {
            grid_type: GridType::Mercator,
            shape: (1, 1),
            bounds: BoundingBox::new(
                -MERCATOR_EXTENT,
                -MERCATOR_EXTENT,
                MERCATOR_EXTENT,
                MERCATOR_EXTENT,
            ),
            is_global: true,
            crs: CrsCode::Epsg3857,
        }
    }

    /// Custom grid. Zoom-0 tiles must be square in CRS units.
    pub fn custom(
        shape: (u32, u32),
        bounds: BoundingBox,
        is_global: bool,
        crs: CrsCode,
    ) -> PyramidResult<Self> {
        let (rows, cols) = shape;
        if rows == 0 || cols == 0 {
            return Err(PyramidError::InvalidGrid(format!(
                "shape must be positive, got {:?}",
                shape
            )));
        }
        if bounds.width() <= 0.0 || bounds.height() <= 0.0 {
            return Err(PyramidError::InvalidGrid(format!(
                "empty bounds {:?}",
                bounds.to_array()
            )));
        }

        let tile_width = bounds.width() / cols as f64;
        let tile_height = bounds.height() / rows as f64;
        if ((tile_width - tile_height) / tile_width).abs() > 1e-9 {
            return Err(PyramidError::InvalidGrid(format!(
                "shape {:?} and bounds {:?} do not form square tiles",
                shape,
                bounds.to_array()
            )));
        }

        Ok(Self {
            grid_type: GridType::Custom,
            shape,
            bounds,
            is_global,
            crs,
        })
    }

    /// Look up a named grid ("geodetic" or "mercator").
    pub fn from_name(name: &str) -> PyramidResult<Self> {
        match name.to_lowercase().as_str() {
            "geodetic" => Ok(Self::geodetic()),
            "mercator" => Ok(Self::mercator()),
            other => Err(PyramidError::InvalidGrid(format!("unknown grid '{}'", other))),
        }
    }

    pub fn srid(&self) -> u32 {
        self.crs.epsg()
    }

    pub fn rows(&self) -> u32 {
        self.shape.0
    }

    pub fn cols(&self) -> u32 {
        self.shape.1
    }
}

//! Bounding box types and operations.

use serde::{Deserialize, Serialize};

use crate::{PyramidError, PyramidResult};

/// A geographic or projected bounding box.
///
/// For geographic CRS (EPSG:4326), coordinates are in degrees.
/// For projected CRS (EPSG:3857, etc.), coordinates are in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Create a new bounding box from corner coordinates.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Parse a bounds string: "left,bottom,right,top"
    pub fn parse(s: &str) -> PyramidResult<Self> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(PyramidError::InvalidBounds(format!(
                "{}: expected 'left,bottom,right,top'",
                s
            )));
        }

        let mut values = [0.0; 4];
        for (value, part) in values.iter_mut().zip(&parts) {
            *value = part
                .parse()
                .map_err(|_| PyramidError::InvalidBounds(format!("invalid number '{}'", part)))?;
        }
        Self::from_slice(&values)
    }

    /// Build from a `[left, bottom, right, top]` slice, rejecting inverted boxes.
    pub fn from_slice(values: &[f64]) -> PyramidResult<Self> {
        match values {
            [min_x, min_y, max_x, max_y] if min_x < max_x && min_y < max_y => {
                Ok(Self::new(*min_x, *min_y, *max_x, *max_y))
            }
            _ => Err(PyramidError::InvalidBounds(format!("{:?}", values))),
        }
    }

    /// Width of the bounding box in coordinate units.
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Height of the bounding box in coordinate units.
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// `[left, bottom, right, top]`
    pub fn to_array(&self) -> [f64; 4] {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }

    /// Check if this bbox intersects another. Touching edges do not count.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x < other.max_x
            && self.max_x > other.min_x
            && self.min_y < other.max_y
            && self.max_y > other.min_y
    }

    /// Compute the intersection of two bounding boxes.
    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        if !self.intersects(other) {
            return None;
        }

        Some(BoundingBox {
            min_x: self.min_x.max(other.min_x),
            min_y: self.min_y.max(other.min_y),
            max_x: self.max_x.min(other.max_x),
            max_y: self.max_y.min(other.max_y),
        })
    }

    /// Check if a point is contained within this bbox.
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// Check if another bbox lies completely within this one.
    pub fn contains(&self, other: &BoundingBox) -> bool {
        other.min_x >= self.min_x
            && other.max_x <= self.max_x
            && other.min_y >= self.min_y
            && other.max_y <= self.max_y
    }

    /// Grow the box by `dx` on the left and right and `dy` on the top and bottom.
    pub fn buffered(&self, dx: f64, dy: f64) -> BoundingBox {
        BoundingBox::new(
            self.min_x - dx,
            self.min_y - dy,
            self.max_x + dx,
            self.max_y + dy,
        )
    }

    /// Smallest box containing all points, `None` for an empty iterator.
    pub fn from_points<I>(points: I) -> Option<BoundingBox>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        points.into_iter().fold(None, |acc, (x, y)| {
            Some(match acc {
                None => BoundingBox::new(x, y, x, y),
                Some(b) => BoundingBox::new(
                    b.min_x.min(x),
                    b.min_y.min(y),
                    b.max_x.max(x),
                    b.max_y.max(y),
                ),
            })
        })
    }

    /// Outline of the box as a closed ring whose segments are no longer than
    /// `max_segment`. Reprojected outlines stay accurate when edges curve.
    pub fn segmentize(&self, max_segment: f64) -> Vec<(f64, f64)> {
        let corners = [
            (self.min_x, self.min_y),
            (self.max_x, self.min_y),
            (self.max_x, self.max_y),
            (self.min_x, self.max_y),
            (self.min_x, self.min_y),
        ];

        let mut ring = Vec::new();
        for edge in corners.windows(2) {
            let (x0, y0) = edge[0];
            let (x1, y1) = edge[1];
            let length = ((x1 - x0).powi(2) + (y1 - y0).powi(2)).sqrt();
            let steps = if max_segment > 0.0 && max_segment.is_finite() {
                (length / max_segment).ceil().max(1.0) as usize
            } else {
                1
            };
            for step in 0..steps {
                let t = step as f64 / steps as f64;
                ring.push((x0 + (x1 - x0) * t, y0 + (y1 - y0) * t));
            }
        }
        ring.push(corners[4]);
        ring
    }
}

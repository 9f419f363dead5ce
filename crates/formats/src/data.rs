//! Payloads exchanged with drivers: masked rasters and feature sequences.

use pyramid_common::BoundingBox;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{FormatError, Result};

/// Band-sequential raster with a no-data mask of the same shape.
///
/// `data` and `mask` are laid out as `[band][row][col]`. A `true` mask entry
/// marks a no-data pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskedArray {
    pub bands: usize,
    pub height: usize,
    pub width: usize,
    pub data: Vec<f32>,
    pub mask: Vec<bool>,
}

impl MaskedArray {
    pub fn new(
        bands: usize,
        height: usize,
        width: usize,
        data: Vec<f32>,
        mask: Vec<bool>,
    ) -> Result<Self> {
        let expected = bands * height * width;
        if data.len() != expected || mask.len() != expected {
            return Err(FormatError::encoding(format!(
                "array of shape ({}, {}, {}) needs {} values, got {} values and {} mask entries",
                bands,
                height,
                width,
                expected,
                data.len(),
                mask.len()
            )));
        }
        Ok(Self {
            bands,
            height,
            width,
            data,
            mask,
        })
    }

    /// Array where every pixel is no-data, holding `fill` as value.
    pub fn masked(bands: usize, height: usize, width: usize, fill: f32) -> Self {
        let len = bands * height * width;
        Self {
            bands,
            height,
            width,
            data: vec![fill; len],
            mask: vec![true; len],
        }
    }

    /// Unmasked array filled with `value`.
    pub fn filled(bands: usize, height: usize, width: usize, value: f32) -> Self {
        let len = bands * height * width;
        Self {
            bands,
            height,
            width,
            data: vec![value; len],
            mask: vec![false; len],
        }
    }

    /// Unmasked array from band-sequential values, masking `nodata` if given.
    pub fn from_values(
        bands: usize,
        height: usize,
        width: usize,
        data: Vec<f32>,
        nodata: Option<f32>,
    ) -> Result<Self> {
        let mask = data.iter().map(|v| Some(*v) == nodata).collect();
        Self::new(bands, height, width, data, mask)
    }

    /// `(bands, height, width)`
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.bands, self.height, self.width)
    }

    /// True when every pixel is masked.
    pub fn is_empty(&self) -> bool {
        self.mask.iter().all(|m| *m)
    }

    pub fn index(&self, band: usize, row: usize, col: usize) -> usize {
        (band * self.height + row) * self.width + col
    }

    /// Value and mask flag at a pixel.
    pub fn get(&self, band: usize, row: usize, col: usize) -> (f32, bool) {
        let idx = self.index(band, row, col);
        (self.data[idx], self.mask[idx])
    }

    pub fn set(&mut self, band: usize, row: usize, col: usize, value: f32, masked: bool) {
        let idx = self.index(band, row, col);
        self.data[idx] = value;
        self.mask[idx] = masked;
    }

    pub fn band_values(&self, band: usize) -> &[f32] {
        let size = self.height * self.width;
        &self.data[band * size..(band + 1) * size]
    }

    pub fn band_mask(&self, band: usize) -> &[bool] {
        let size = self.height * self.width;
        &self.mask[band * size..(band + 1) * size]
    }

    /// Copy of a single band as a one-band array.
    pub fn band(&self, band: usize) -> MaskedArray {
        MaskedArray {
            bands: 1,
            height: self.height,
            width: self.width,
            data: self.band_values(band).to_vec(),
            mask: self.band_mask(band).to_vec(),
        }
    }

    /// Stack one-band arrays of equal shape into a multi-band array.
    pub fn stack(bands: Vec<MaskedArray>) -> Result<Self> {
        let Some(first) = bands.first() else {
            return Err(FormatError::encoding("cannot stack zero bands"));
        };
        let (height, width) = (first.height, first.width);
        let mut data = Vec::with_capacity(bands.len() * height * width);
        let mut mask = Vec::with_capacity(bands.len() * height * width);
        let mut count = 0;
        for band in &bands {
            if (band.height, band.width) != (height, width) {
                return Err(FormatError::encoding(format!(
                    "band shape ({}, {}) differs from ({}, {})",
                    band.height, band.width, height, width
                )));
            }
            data.extend_from_slice(&band.data);
            mask.extend_from_slice(&band.mask);
            count += band.bands;
        }
        Self::new(count, height, width, data, mask)
    }

    /// Values with masked pixels replaced by `fill`.
    pub fn filled_values(&self, fill: f32) -> Vec<f32> {
        self.data
            .iter()
            .zip(&self.mask)
            .map(|(v, m)| if *m { fill } else { *v })
            .collect()
    }
}

/// GeoJSON-like feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "Feature")]
pub struct Feature {
    #[serde(default)]
    pub geometry: Value,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Feature {
    pub fn new(geometry: Value, properties: Map<String, Value>) -> Self {
        Self {
            geometry,
            properties,
        }
    }

    /// GeoJSON geometry type, e.g. "Polygon".
    pub fn geometry_type(&self) -> Option<&str> {
        self.geometry.get("type").and_then(Value::as_str)
    }

    /// Bounds of all coordinates, `None` for missing or empty geometries.
    pub fn bounds(&self) -> Option<BoundingBox> {
        let mut points = Vec::new();
        collect_coordinates(&self.geometry, &mut points);
        BoundingBox::from_points(points)
    }

    /// Has a geometry type and at least one coordinate.
    pub fn is_valid(&self) -> bool {
        self.geometry_type().is_some() && self.bounds().is_some()
    }
}

fn collect_coordinates(geometry: &Value, points: &mut Vec<(f64, f64)>) {
    if let Some(geometries) = geometry.get("geometries").and_then(Value::as_array) {
        for g in geometries {
            collect_coordinates(g, points);
        }
        return;
    }
    if let Some(coords) = geometry.get("coordinates") {
        collect_positions(coords, points);
    }
}

fn collect_positions(value: &Value, points: &mut Vec<(f64, f64)>) {
    let Some(items) = value.as_array() else {
        return;
    };
    match (items.first().and_then(Value::as_f64), items.get(1).and_then(Value::as_f64)) {
        (Some(x), Some(y)) => points.push((x, y)),
        _ => {
            for item in items {
                collect_positions(item, points);
            }
        }
    }
}

/// Tile payload: a raster for raster drivers, features for vector drivers.
#[derive(Debug, Clone, PartialEq)]
pub enum TileData {
    Raster(MaskedArray),
    Vector(Vec<Feature>),
}

impl TileData {
    /// Fully masked raster or no features.
    pub fn is_empty(&self) -> bool {
        match self {
            TileData::Raster(array) => array.is_empty(),
            TileData::Vector(features) => features.is_empty(),
        }
    }

    pub fn as_raster(&self) -> Option<&MaskedArray> {
        match self {
            TileData::Raster(array) => Some(array),
            TileData::Vector(_) => None,
        }
    }

    pub fn as_features(&self) -> Option<&[Feature]> {
        match self {
            TileData::Vector(features) => Some(features),
            TileData::Raster(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let result = MaskedArray::new(1, 2, 2, vec![0.0; 4], vec![false; 3]);
        assert!(matches!(result, Err(FormatError::Encoding(_))));
    }

    #[test]
    fn test_masked_array_is_empty() {
        let mut array = MaskedArray::masked(2, 3, 3, 0.0);
        assert!(array.is_empty());
        array.set(1, 2, 2, 7.0, false);
        assert!(!array.is_empty());
        assert_eq!(array.get(1, 2, 2), (7.0, false));
        assert_eq!(array.band(1).data[8], 7.0);
    }

    #[test]
    fn test_feature_bounds() {
        let feature = Feature::new(
            json!({"type": "Polygon", "coordinates": [[[1.0, 2.0], [3.0, 2.0], [3.0, 5.0], [1.0, 2.0]]]}),
            Map::new(),
        );
        assert_eq!(feature.geometry_type(), Some("Polygon"));
        assert_eq!(feature.bounds(), Some(BoundingBox::new(1.0, 2.0, 3.0, 5.0)));

        let empty = Feature::new(Value::Null, Map::new());
        assert!(!empty.is_valid());
    }

    #[test]
    fn test_feature_serializes_as_geojson() {
        let feature = Feature::new(json!({"type": "Point", "coordinates": [1.0, 2.0]}), Map::new());
        let value = serde_json::to_value(&feature).unwrap();
        assert_eq!(value["type"], "Feature");
        assert_eq!(value["geometry"]["type"], "Point");
    }
}

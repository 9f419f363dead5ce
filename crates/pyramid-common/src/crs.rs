//! Coordinate Reference System codes and point transforms.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{BoundingBox, PyramidError, PyramidResult};

/// Spherical Mercator earth radius in meters.
const EARTH_RADIUS: f64 = 6_378_137.0;

/// Latitude limit of the square Web Mercator extent.
const MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_6;

/// CRS identified by EPSG code.
///
/// Only WGS84 and Web Mercator carry transform math; other codes are accepted
/// for custom grids but cannot be reprojected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CrsCode {
    /// WGS84 Geographic (lon/lat in degrees)
    Epsg4326,
    /// Web Mercator (meters)
    Epsg3857,
    /// Any other EPSG code
    Other(u32),
}

impl CrsCode {
    pub fn from_epsg(code: u32) -> Self {
        match code {
            4326 => CrsCode::Epsg4326,
            3857 | 900913 => CrsCode::Epsg3857,
            other => CrsCode::Other(other),
        }
    }

    /// Parse "EPSG:4326", "epsg:3857" or a bare code.
    pub fn parse(s: &str) -> PyramidResult<Self> {
        let normalized = s.trim().to_uppercase();
        let code = normalized.strip_prefix("EPSG:").unwrap_or(&normalized);
        code.parse::<u32>()
            .map(Self::from_epsg)
            .map_err(|_| PyramidError::UnsupportedCrs(s.to_string()))
    }

    pub fn epsg(&self) -> u32 {
        match self {
            CrsCode::Epsg4326 => 4326,
            CrsCode::Epsg3857 => 3857,
            CrsCode::Other(code) => *code,
        }
    }

    /// Check if this is a geographic (lat/lon) CRS.
    pub fn is_geographic(&self) -> bool {
        matches!(self, CrsCode::Epsg4326)
    }

    /// Transform a single point from `self` into `to`.
    pub fn transform_point(&self, to: CrsCode, x: f64, y: f64) -> PyramidResult<(f64, f64)> {
        match (self, to) {
            (a, b) if *a == b => Ok((x, y)),
            (CrsCode::Epsg4326, CrsCode::Epsg3857) => Ok(lonlat_to_mercator(x, y)),
            (CrsCode::Epsg3857, CrsCode::Epsg4326) => Ok(mercator_to_lonlat(x, y)),
            _ => Err(PyramidError::UnsupportedTransform {
                from: self.to_string(),
                to: to.to_string(),
            }),
        }
    }

    /// Reproject a box by transforming its segmentized outline and taking
    /// the bounds of the result.
    pub fn transform_bounds(
        &self,
        to: CrsCode,
        bounds: &BoundingBox,
        max_segment: f64,
    ) -> PyramidResult<BoundingBox> {
        if *self == to {
            return Ok(*bounds);
        }
        let mut points = Vec::new();
        for (x, y) in bounds.segmentize(max_segment) {
            points.push(self.transform_point(to, x, y)?);
        }
        BoundingBox::from_points(points)
            .ok_or_else(|| PyramidError::InvalidBounds(format!("{:?}", bounds)))
    }
}

impl fmt::Display for CrsCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

impl TryFrom<String> for CrsCode {
    type Error = PyramidError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        CrsCode::parse(&value)
    }
}

impl From<CrsCode> for String {
    fn from(crs: CrsCode) -> Self {
        crs.to_string()
    }
}

/// WGS84 lon/lat degrees to Web Mercator meters.
pub fn lonlat_to_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-MERCATOR_MAX_LAT, MERCATOR_MAX_LAT);
    let x = EARTH_RADIUS * lon.to_radians();
    let y = EARTH_RADIUS * (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
    (x, y)
}

/// Web Mercator meters to WGS84 lon/lat degrees.
pub fn mercator_to_lonlat(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / EARTH_RADIUS).to_degrees();
    let lat = (2.0 * (y / EARTH_RADIUS).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
    (lon, lat)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_crs() {
        assert_eq!(CrsCode::parse("EPSG:4326").unwrap(), CrsCode::Epsg4326);
        assert_eq!(CrsCode::parse("epsg:3857").unwrap(), CrsCode::Epsg3857);
        assert_eq!(CrsCode::parse("32633").unwrap(), CrsCode::Other(32633));
        assert!(CrsCode::parse("CRS:unknown").is_err());
    }

    #[test]
    fn test_mercator_round_trip() {
        let (x, y) = lonlat_to_mercator(180.0, 0.0);
        assert!((x - 20037508.342789244).abs() < 1e-6);
        assert!(y.abs() < 1e-6);

        let (lon, lat) = mercator_to_lonlat(lonlat_to_mercator(13.4, 52.5).0, lonlat_to_mercator(13.4, 52.5).1);
        assert!((lon - 13.4).abs() < 1e-9);
        assert!((lat - 52.5).abs() < 1e-9);
    }

    #[test]
    fn test_transform_to_other_is_unsupported() {
        let result = CrsCode::Epsg4326.transform_point(CrsCode::Other(32633), 0.0, 0.0);
        assert!(matches!(result, Err(PyramidError::UnsupportedTransform { .. })));
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&CrsCode::Epsg3857).unwrap();
        assert_eq!(json, "\"EPSG:3857\"");
        let back: CrsCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, CrsCode::Epsg3857);
    }
}

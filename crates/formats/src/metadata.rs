//! Output metadata registry: `<output-path>/metadata.json`.
//!
//! The first writer to use an output location persists a record of the
//! output pyramid and driver; every later open must agree with it. A record
//! is never updated.

use bytes::Bytes;
use pyramid_common::{GridType, TilePyramid};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use storage::{path, ReadOutcome};
use tracing::{debug, info};

use crate::{FormatError, OutputDriver, Result};

pub const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridRecord {
    #[serde(rename = "type")]
    pub grid_type: GridType,
    pub shape: [u32; 2],
    pub bounds: [f64; 4],
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
    pub top: f64,
    pub is_global: bool,
    pub srid: u32,
    pub crs: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PyramidRecord {
    pub grid: GridRecord,
    pub metatiling: u32,
    pub pixelbuffer: u32,
}

impl From<&TilePyramid> for PyramidRecord {
    fn from(pyramid: &TilePyramid) -> Self {
        let grid = &pyramid.grid;
        let bounds = grid.bounds;
        PyramidRecord {
            grid: GridRecord {
                grid_type: grid.grid_type,
                shape: [grid.shape.0, grid.shape.1],
                bounds: bounds.to_array(),
                left: bounds.min_x,
                bottom: bounds.min_y,
                right: bounds.max_x,
                top: bounds.max_y,
                is_global: grid.is_global,
                srid: grid.srid(),
                crs: grid.crs.to_string(),
            },
            metatiling: pyramid.metatiling,
            pixelbuffer: pyramid.pixelbuffer,
        }
    }
}

/// Canonical description of an output location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputMetadata {
    pub pyramid: PyramidRecord,
    pub driver: Map<String, Value>,
}

impl OutputMetadata {
    pub fn new(pyramid: &TilePyramid, driver: Map<String, Value>) -> Self {
        Self {
            pyramid: PyramidRecord::from(pyramid),
            driver,
        }
    }

    pub fn from_driver(driver: &dyn OutputDriver) -> Self {
        Self::new(driver.pyramid(), driver.metadata_params())
    }

    /// Sorted keys, 4-space indentation.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        // serde_json::Map is ordered by key, so going through Value sorts
        // struct fields too.
        let value = serde_json::to_value(self)?;
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        value.serialize(&mut serializer)?;
        Ok(out)
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Compare pyramid and driver format against an established record.
    pub fn verify_against(&self, existing: &OutputMetadata) -> Result<()> {
        let (old, new) = (&existing.pyramid, &self.pyramid);
        let grid_fields: [(&str, String, String); 5] = [
            ("grid.type", old.grid.grid_type.to_string(), new.grid.grid_type.to_string()),
            ("grid.shape", format!("{:?}", old.grid.shape), format!("{:?}", new.grid.shape)),
            ("grid.bounds", format!("{:?}", old.grid.bounds), format!("{:?}", new.grid.bounds)),
            ("grid.is_global", old.grid.is_global.to_string(), new.grid.is_global.to_string()),
            ("grid.srid", old.grid.srid.to_string(), new.grid.srid.to_string()),
        ];
        for (field, existing, current) in grid_fields {
            if existing != current {
                return Err(FormatError::conflict(field, existing, current));
            }
        }
        if old.metatiling != new.metatiling {
            return Err(FormatError::conflict("metatiling", old.metatiling, new.metatiling));
        }
        if old.pixelbuffer != new.pixelbuffer {
            return Err(FormatError::conflict("pixelbuffer", old.pixelbuffer, new.pixelbuffer));
        }
        if old != new {
            return Err(FormatError::conflict(
                "pyramid",
                format!("{:?}", old),
                format!("{:?}", new),
            ));
        }

        let format_of = |m: &OutputMetadata| m.driver.get("format").cloned().unwrap_or(Value::Null);
        let (old_format, new_format) = (format_of(existing), format_of(self));
        if old_format != new_format {
            return Err(FormatError::conflict("driver.format", old_format, new_format));
        }
        Ok(())
    }
}

async fn read_existing(driver: &dyn OutputDriver, file: &str) -> Result<Option<OutputMetadata>> {
    match driver.store().backend().read_bytes(file).await? {
        ReadOutcome::Found(bytes) => Ok(Some(OutputMetadata::from_json(&bytes)?)),
        ReadOutcome::NotFound => Ok(None),
    }
}

/// Establish or verify the metadata record of a driver's output location.
///
/// An existing record is compared against the driver's configuration. When
/// none exists and `readonly` is false, the record is created only if still
/// absent; losing that race means verifying against the winner's record, so
/// concurrent establishers either agree or all but one fail with a conflict.
/// Read-only opens and non-writable backends never write.
pub async fn prepare_output(driver: &dyn OutputDriver, readonly: bool) -> Result<OutputMetadata> {
    let current = OutputMetadata::from_driver(driver);
    let file = path::join(driver.path(), [METADATA_FILE]);
    let span = &driver.store().ctx().span;

    if let Some(existing) = read_existing(driver, &file).await? {
        current.verify_against(&existing)?;
        debug!(parent: span, path = %file, "Output metadata verified");
        return Ok(existing);
    }

    if readonly || !driver.store().backend().is_writable() {
        debug!(parent: span, path = %file, "No output metadata found, not establishing");
        return Ok(current);
    }

    driver.store().backend().ensure_dir(driver.path()).await?;
    let created = driver
        .store()
        .backend()
        .write_bytes_if_absent(&file, Bytes::from(current.to_json()?))
        .await?;
    if created {
        info!(parent: span, path = %file, "Established output metadata");
    } else {
        debug!(parent: span, path = %file, "Output metadata established concurrently");
    }

    match read_existing(driver, &file).await? {
        Some(written) => {
            current.verify_against(&written)?;
            Ok(written)
        }
        None => Err(FormatError::config(format!(
            "output metadata {} vanished after writing",
            file
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyramid_common::GridDefinition;
    use serde_json::json;

    fn record(metatiling: u32, format: &str) -> OutputMetadata {
        let pyramid = TilePyramid::new(GridDefinition::geodetic(), metatiling, 0).unwrap();
        let mut driver = Map::new();
        driver.insert("format".to_string(), json!(format));
        OutputMetadata::new(&pyramid, driver)
    }

    #[test]
    fn test_json_layout() {
        let json = String::from_utf8(record(1, "PNG").to_json().unwrap()).unwrap();
        assert!(json.starts_with("{\n    \"driver\""));

        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["pyramid"]["grid"]["type"], "geodetic");
        assert_eq!(value["pyramid"]["grid"]["shape"], json!([1, 2]));
        assert_eq!(value["pyramid"]["grid"]["srid"], 4326);
        assert_eq!(value["pyramid"]["grid"]["crs"], "EPSG:4326");
        assert_eq!(value["pyramid"]["grid"]["left"], -180.0);
    }

    #[test]
    fn test_json_round_trip_is_equal() {
        let original = record(2, "GeoJSON");
        let parsed = OutputMetadata::from_json(&original.to_json().unwrap()).unwrap();
        assert_eq!(parsed, original);
        assert!(original.verify_against(&parsed).is_ok());
    }

    #[test]
    fn test_conflicts_name_both_values() {
        let err = record(2, "PNG").verify_against(&record(1, "PNG")).unwrap_err();
        assert!(err.is_conflict());
        let message = err.to_string();
        assert!(message.contains("metatiling"));
        assert!(message.contains("existing 1"));
        assert!(message.contains("current 2"));

        let err = record(1, "GeoJSON").verify_against(&record(1, "PNG")).unwrap_err();
        assert!(err.to_string().contains("driver.format"));
    }

    #[test]
    fn test_other_driver_params_do_not_conflict() {
        let mut with_nodata = record(1, "PNG");
        with_nodata.driver.insert("nodata".to_string(), json!(7));
        assert!(with_nodata.verify_against(&record(1, "PNG")).is_ok());
    }
}

//! GeoJSON output: one FeatureCollection file per tile.
//!
//! Restricted to geodetic grids, the only CRS GeoJSON supports.
//!
//! Output configuration:
//! - `path` (required): output directory
//! - `schema.geometry` (required): one of Geometry, Point, MultiPoint, Line,
//!   MultiLine, Polygon, MultiPolygon
//! - `schema.properties` (required): field name to field type

use async_trait::async_trait;
use bytes::Bytes;
use pyramid_common::{BoundingBox, GridType, Tile, TilePyramid};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use storage::ReadOutcome;
use tracing::debug;

use crate::driver::{require_object, require_str, OutputFormat, OutputParams, TileStore, WebOutput};
use crate::{DriverContext, Feature, FormatError, OutputDriver, Result, TileData};

pub const GEOMETRY_TYPES: [&str; 7] = [
    "Geometry",
    "Point",
    "MultiPoint",
    "Line",
    "MultiLine",
    "Polygon",
    "MultiPolygon",
];

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename = "FeatureCollection")]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<Feature>,
}

/// Validate the schema and require a geodetic output pyramid.
pub fn is_valid_with_config(config: &Map<String, Value>, pyramid: &TilePyramid) -> Result<bool> {
    require_str(config, "path")?;
    let schema = require_object(config, "schema")?;
    require_object(schema, "properties")?;
    let geometry = require_str(schema, "geometry")?;
    if !GEOMETRY_TYPES.contains(&geometry) {
        return Err(FormatError::config(format!("invalid geometry type '{}'", geometry)));
    }
    if pyramid.grid.grid_type != GridType::Geodetic {
        return Err(FormatError::config("output pyramid has to be geodetic"));
    }
    Ok(true)
}

/// Whether a schema geometry kind admits a GeoJSON geometry type.
pub fn admits(schema_geometry: &str, geometry_type: &str) -> bool {
    match schema_geometry {
        "Geometry" => true,
        "Line" => geometry_type == "LineString",
        "MultiLine" => geometry_type == "MultiLineString",
        other => other == geometry_type,
    }
}

/// Closed-interval overlap, so points on tile edges are kept.
fn overlaps(a: &BoundingBox, b: &BoundingBox) -> bool {
    a.min_x <= b.max_x && a.max_x >= b.min_x && a.min_y <= b.max_y && a.max_y >= b.min_y
}

pub struct GeoJsonOutput {
    store: TileStore,
    schema_geometry: String,
    properties: Vec<String>,
}

impl GeoJsonOutput {
    pub fn new(params: OutputParams, ctx: DriverContext) -> Result<Self> {
        is_valid_with_config(&params.config, &params.pyramid)?;
        let schema = require_object(&params.config, "schema")?;
        let schema_geometry = require_str(schema, "geometry")?.to_string();
        let properties = require_object(schema, "properties")?.keys().cloned().collect();
        Ok(Self {
            store: TileStore::open(&params, ctx)?,
            schema_geometry,
            properties,
        })
    }

    /// Feature restricted to schema properties. An empty property schema
    /// keeps all properties.
    fn conform(&self, feature: &Feature) -> Feature {
        if self.properties.is_empty() {
            return feature.clone();
        }
        let properties = feature
            .properties
            .iter()
            .filter(|(k, _)| self.properties.contains(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Feature::new(feature.geometry.clone(), properties)
    }
}

#[async_trait]
impl OutputDriver for GeoJsonOutput {
    fn format(&self) -> OutputFormat {
        OutputFormat::GeoJson
    }

    fn store(&self) -> &TileStore {
        &self.store
    }

    fn is_valid_with_config(&self, config: &Map<String, Value>) -> Result<bool> {
        is_valid_with_config(config, self.store.pyramid())
    }

    async fn write(&self, process_tile: &Tile, data: &TileData) -> Result<()> {
        let features = data.as_features().ok_or_else(|| {
            FormatError::encoding("GeoJSON output requires a list of features, got a raster")
        })?;
        if features.is_empty() {
            debug!(parent: &self.store.ctx().span, tile = %process_tile, "no features to write");
            return Ok(());
        }

        let admitted: Vec<(BoundingBox, &Feature)> = features
            .iter()
            .filter(|f| {
                let ok = f
                    .geometry_type()
                    .map(|t| admits(&self.schema_geometry, t))
                    .unwrap_or(false);
                if !ok {
                    debug!(
                        parent: &self.store.ctx().span,
                        geometry = ?f.geometry_type(),
                        schema = %self.schema_geometry,
                        "skipping feature not matching schema"
                    );
                }
                ok
            })
            .filter_map(|f| f.bounds().map(|b| (b, f)))
            .collect();

        for out_tile in self.output_tiles(process_tile) {
            let tile_bounds = out_tile.buffered_bounds();
            let out_features: Vec<Feature> = admitted
                .iter()
                .filter(|(bounds, _)| overlaps(bounds, &tile_bounds))
                .map(|(_, f)| self.conform(f))
                .collect();
            if out_features.is_empty() {
                continue;
            }

            let collection = FeatureCollection {
                features: out_features,
            };
            let bytes = serde_json::to_vec(&collection)?;
            self.store.write_tile(&out_tile, Bytes::from(bytes)).await?;
        }
        Ok(())
    }

    async fn read(&self, output_tile: &Tile) -> Result<TileData> {
        match self.store.read_tile(output_tile).await? {
            ReadOutcome::Found(bytes) => {
                let collection: FeatureCollection = serde_json::from_slice(&bytes)?;
                Ok(TileData::Vector(collection.features))
            }
            ReadOutcome::NotFound => Ok(self.empty(output_tile)),
        }
    }

    fn empty(&self, _tile: &Tile) -> TileData {
        TileData::Vector(Vec::new())
    }

    fn for_web(&self, data: &TileData) -> Result<WebOutput> {
        let features = data.as_features().ok_or_else(|| {
            FormatError::encoding("GeoJSON output requires a list of features, got a raster")
        })?;
        Ok(WebOutput::Features(features.to_vec()))
    }
}

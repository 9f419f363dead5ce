//! Driver capability contract shared by all output formats.

use async_trait::async_trait;
use bytes::Bytes;
use pyramid_common::{Tile, TilePyramid};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use storage::{path, ReadOutcome, StorageBackend};
use tracing::debug;

use crate::geojson::GeoJsonOutput;
use crate::png::PngOutput;
use crate::png_hillshade::PngHillshadeOutput;
use crate::{DriverContext, Feature, FormatError, InputTile, RawOutputSource, Result, TileData};

/// Keys that describe the pyramid rather than the driver and are left out of
/// the driver section of the output metadata.
const NON_DRIVER_KEYS: [&str; 5] = ["path", "type", "grid", "pixelbuffer", "metatiling"];

// ============================================================================
// Formats
// ============================================================================

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    GeoJson,
    Png,
    PngHillshade,
}

impl OutputFormat {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "GeoJSON" => Ok(OutputFormat::GeoJson),
            "PNG" => Ok(OutputFormat::Png),
            "PNG_hillshade" => Ok(OutputFormat::PngHillshade),
            other => Err(FormatError::config(format!(
                "unknown output format '{}', expected one of GeoJSON, PNG, PNG_hillshade",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OutputFormat::GeoJson => "GeoJSON",
            OutputFormat::Png => "PNG",
            OutputFormat::PngHillshade => "PNG_hillshade",
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            OutputFormat::GeoJson => ".geojson",
            OutputFormat::Png | OutputFormat::PngHillshade => ".png",
        }
    }

    pub fn is_raster(&self) -> bool {
        !matches!(self, OutputFormat::GeoJson)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Parameters
// ============================================================================

/// Output configuration: the raw `output` mapping plus the output pyramid.
#[derive(Debug, Clone)]
pub struct OutputParams {
    pub format: OutputFormat,
    pub path: String,
    pub config: Map<String, Value>,
    pub pyramid: TilePyramid,
}

impl OutputParams {
    /// Read `format` and `path` from an `output` mapping.
    pub fn from_config(config: Map<String, Value>, pyramid: TilePyramid) -> Result<Self> {
        let format = OutputFormat::from_name(require_str(&config, "format")?)?;
        let path = require_str(&config, "path")?.to_string();
        Ok(Self {
            format,
            path,
            config,
            pyramid,
        })
    }
}

/// String value of a required key.
pub(crate) fn require_str<'a>(config: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    match config.get(key) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(FormatError::config(format!(
            "'{}' must be a string, got {}",
            key, other
        ))),
        None => Err(FormatError::config(format!("'{}' is required", key))),
    }
}

/// Mapping value of a required key.
pub(crate) fn require_object<'a>(
    config: &'a Map<String, Value>,
    key: &str,
) -> Result<&'a Map<String, Value>> {
    match config.get(key) {
        Some(Value::Object(map)) => Ok(map),
        Some(other) => Err(FormatError::config(format!(
            "'{}' must be a mapping, got {}",
            key, other
        ))),
        None => Err(FormatError::config(format!("'{}' is required", key))),
    }
}

/// Optional numeric value with a default.
pub(crate) fn optional_f32(config: &Map<String, Value>, key: &str, default: f32) -> Result<f32> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value
            .as_f64()
            .map(|v| v as f32)
            .ok_or_else(|| FormatError::config(format!("'{}' must be a number", key))),
    }
}

// ============================================================================
// Web output
// ============================================================================

/// Result of [`OutputDriver::for_web`].
#[derive(Debug, Clone, PartialEq)]
pub enum WebOutput {
    /// Encoded image container
    Image { bytes: Bytes, mime: &'static str },
    /// Features to be served as JSON
    Features(Vec<Feature>),
}

impl WebOutput {
    pub fn mime(&self) -> &'static str {
        match self {
            WebOutput::Image { mime, .. } => mime,
            WebOutput::Features(_) => "application/json",
        }
    }
}

// ============================================================================
// Tile store
// ============================================================================

/// Path resolution and file I/O for one output location.
pub struct TileStore {
    path: String,
    extension: &'static str,
    config: Map<String, Value>,
    pyramid: TilePyramid,
    backend: StorageBackend,
    ctx: DriverContext,
}

impl TileStore {
    pub fn open(params: &OutputParams, ctx: DriverContext) -> Result<Self> {
        let backend = StorageBackend::open(&params.path, &ctx.storage)?;
        Ok(Self {
            path: params.path.trim_end_matches('/').to_string(),
            extension: params.format.file_extension(),
            config: params.config.clone(),
            pyramid: params.pyramid.clone(),
            backend,
            ctx,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn config(&self) -> &Map<String, Value> {
        &self.config
    }

    pub fn pyramid(&self) -> &TilePyramid {
        &self.pyramid
    }

    pub fn backend(&self) -> &StorageBackend {
        &self.backend
    }

    pub fn ctx(&self) -> &DriverContext {
        &self.ctx
    }

    /// `<path>/<zoom>/<row>/<col><extension>`
    pub fn tile_path(&self, tile: &Tile) -> String {
        path::join(
            &self.path,
            [
                tile.zoom().to_string(),
                tile.row().to_string(),
                format!("{}{}", tile.col(), self.extension),
            ],
        )
    }

    /// Create the tile's directory, then write the encoded payload.
    pub async fn write_tile(&self, tile: &Tile, data: Bytes) -> Result<()> {
        let file = self.tile_path(tile);
        if let Some(dir) = path::parent(&file) {
            self.backend.ensure_dir(dir).await?;
        }
        debug!(parent: &self.ctx.span, tile = %tile, path = %file, size = data.len(), "Writing tile");
        self.backend.write_bytes(&file, data).await?;
        Ok(())
    }

    pub async fn read_tile(&self, tile: &Tile) -> Result<ReadOutcome> {
        let file = self.tile_path(tile);
        let outcome = self.backend.read_bytes(&file).await?;
        if outcome == ReadOutcome::NotFound {
            debug!(parent: &self.ctx.span, tile = %tile, path = %file, "Tile not found");
        }
        Ok(outcome)
    }

    pub async fn tile_exists(&self, tile: &Tile) -> Result<bool> {
        Ok(self.backend.exists(&self.tile_path(tile)).await?)
    }
}

// ============================================================================
// Driver contract
// ============================================================================

/// Operations every output driver provides.
#[async_trait]
pub trait OutputDriver: Send + Sync {
    fn format(&self) -> OutputFormat;

    fn store(&self) -> &TileStore;

    /// Validate an `output` mapping without touching storage.
    fn is_valid_with_config(&self, config: &Map<String, Value>) -> Result<bool>;

    /// Persist `data` of a process tile into every output tile it covers.
    /// Empty data is a no-op.
    async fn write(&self, process_tile: &Tile, data: &TileData) -> Result<()>;

    /// Stored payload of an output tile, or `empty` when it does not exist.
    async fn read(&self, output_tile: &Tile) -> Result<TileData>;

    /// All no-data payload shaped to `tile`.
    fn empty(&self, tile: &Tile) -> TileData;

    /// Render data for HTTP delivery.
    fn for_web(&self, data: &TileData) -> Result<WebOutput>;

    fn path(&self) -> &str {
        self.store().path()
    }

    fn pyramid(&self) -> &TilePyramid {
        self.store().pyramid()
    }

    fn file_extension(&self) -> &'static str {
        self.format().file_extension()
    }

    fn tile_path(&self, tile: &Tile) -> String {
        self.store().tile_path(tile)
    }

    /// Driver section of the output metadata record.
    fn metadata_params(&self) -> Map<String, Value> {
        let mut params: Map<String, Value> = self
            .store()
            .config()
            .iter()
            .filter(|(k, _)| !NON_DRIVER_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        params.insert("format".to_string(), Value::from(self.format().name()));
        params
    }

    /// Output tiles written for `process_tile`.
    fn output_tiles(&self, process_tile: &Tile) -> Vec<Tile> {
        self.pyramid().covered_by(process_tile)
    }

    /// Whether every output tile of `process_tile` exists.
    async fn tiles_exist(&self, process_tile: &Tile) -> Result<bool> {
        for tile in self.output_tiles(process_tile) {
            if !self.store().tile_exists(&tile).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Bind this output as input of another process.
    fn open(&self, tile: Tile, source: Arc<dyn RawOutputSource>) -> InputTile {
        InputTile::new(tile, source)
    }
}

/// Build the driver for `params.format`, validating its configuration first.
pub fn load_output_driver(params: OutputParams, ctx: DriverContext) -> Result<Arc<dyn OutputDriver>> {
    debug!(parent: &ctx.span, format = %params.format, "Loading output driver");
    let driver: Arc<dyn OutputDriver> = match params.format {
        OutputFormat::GeoJson => Arc::new(GeoJsonOutput::new(params, ctx)?),
        OutputFormat::Png => Arc::new(PngOutput::new(params, ctx)?),
        OutputFormat::PngHillshade => Arc::new(PngHillshadeOutput::new(params, ctx)?),
    };
    Ok(driver)
}

//! A configured process: inputs, function and output driver.

use async_trait::async_trait;
use formats::metadata::prepare_output;
use formats::raster_file::RasterFileInput;
use formats::window::mosaic;
use formats::{
    load_output_driver, DriverContext, Feature, FormatError, OutputDriver, OutputParams,
    RawOutputSource, TileData,
};
use futures::future::BoxFuture;
use pyramid_common::{BoundingBox, Tile, TilePyramid};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use storage::ObjectStorageConfig;
use tracing::{debug, info, instrument};

use crate::config::{InputSpec, ProcessConfig, ZoomRange};
use crate::function::{OpenedInput, TileContext, TileFunction};
use crate::{ProcessError, Result, RunMode};

/// A configured input of a process.
pub enum ProcessInput {
    Raster(RasterFileInput),
    Process(Arc<Process>),
}

impl ProcessInput {
    pub(crate) fn open(&self, tile: Tile) -> OpenedInput {
        match self {
            Self::Raster(input) => OpenedInput::Raster(input.open(tile)),
            Self::Process(process) => {
                let source: Arc<dyn RawOutputSource> = process.clone();
                OpenedInput::Process(process.output().open(tile, source))
            }
        }
    }
}

fn open_input_process(path: PathBuf, storage: ObjectStorageConfig) -> BoxFuture<'static, Result<Arc<Process>>> {
    Box::pin(async move {
        let process = Process::from_file(&path, RunMode::Readonly, None, storage).await?;
        Ok(Arc::new(process))
    })
}

pub struct Process {
    config: ProcessConfig,
    mode: RunMode,
    function: Option<Arc<dyn TileFunction>>,
    output: Arc<dyn OutputDriver>,
    inputs: BTreeMap<String, ProcessInput>,
}

impl Process {
    /// Open inputs and output of a process.
    ///
    /// Except in memory mode, the output metadata is established or
    /// verified. A process without a function can only be opened read-only.
    pub async fn open(
        config: ProcessConfig,
        mode: RunMode,
        function: Option<Arc<dyn TileFunction>>,
        storage: ObjectStorageConfig,
    ) -> Result<Self> {
        if function.is_none() && mode != RunMode::Readonly {
            return Err(ProcessError::config(format!(
                "process '{}' has no function and can only be opened readonly, not {}",
                config.name, mode
            )));
        }

        let params = OutputParams::from_config(config.output.clone(), config.output_pyramid.clone())?;
        let ctx = DriverContext::output(config.output_path(), storage.clone());
        let output = load_output_driver(params, ctx)?;
        if mode != RunMode::Memory {
            prepare_output(output.as_ref(), mode == RunMode::Readonly).await?;
        }

        let mut inputs = BTreeMap::new();
        for (name, spec) in &config.inputs {
            let input = match spec {
                InputSpec::RasterFile { path, crs, nodata } => {
                    let ctx = DriverContext::input(name, path, storage.clone());
                    let crs = crs.unwrap_or_else(|| config.process_pyramid.crs());
                    ProcessInput::Raster(RasterFileInput::load(path, crs, *nodata, ctx).await?)
                }
                InputSpec::ProcessFile(path) => {
                    let upstream = open_input_process(path.clone(), storage.clone()).await?;
                    if upstream.process_pyramid().grid != config.process_pyramid.grid {
                        return Err(ProcessError::config(format!(
                            "input '{}' uses a different grid than process '{}'",
                            name, config.name
                        )));
                    }
                    ProcessInput::Process(upstream)
                }
            };
            debug!(input = %name, path = %spec.path(), "Opened process input");
            inputs.insert(name.clone(), input);
        }

        info!(
            process = %config.name,
            mode = %mode,
            output = %config.output_path(),
            inputs = inputs.len(),
            "Opened process"
        );
        Ok(Self {
            config,
            mode,
            function,
            output,
            inputs,
        })
    }

    /// Load a process file and open it.
    pub async fn from_file(
        path: impl AsRef<Path>,
        mode: RunMode,
        function: Option<Arc<dyn TileFunction>>,
        storage: ObjectStorageConfig,
    ) -> Result<Self> {
        let config = ProcessConfig::from_file(path)?;
        Self::open(config, mode, function, storage).await
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn output(&self) -> &Arc<dyn OutputDriver> {
        &self.output
    }

    pub fn process_pyramid(&self) -> &TilePyramid {
        &self.config.process_pyramid
    }

    pub fn zoom_levels(&self) -> ZoomRange {
        self.config.zoom_levels
    }

    pub fn bounds(&self) -> BoundingBox {
        self.config.bounds
    }

    /// Process tile by address.
    pub fn tile(&self, zoom: u32, row: u32, col: u32) -> Result<Tile> {
        Ok(self.config.process_pyramid.tile(zoom, row, col)?)
    }

    /// Process tiles intersecting the configured bounds at `zoom`.
    pub fn tiles_at(&self, zoom: u32) -> Vec<Tile> {
        if !self.config.zoom_levels.contains(zoom) {
            return Vec::new();
        }
        self.config.process_pyramid.tiles_from_bounds(&self.config.bounds, zoom)
    }

    fn in_scope(&self, tile: &Tile) -> bool {
        self.config.zoom_levels.contains(tile.zoom()) && tile.bounds().intersects(&self.config.bounds)
    }

    /// Run the process function for one process tile.
    #[instrument(skip(self, tile), fields(process = %self.config.name, tile = %tile))]
    pub async fn execute(&self, tile: &Tile) -> Result<TileData> {
        if tile.pyramid != self.config.process_pyramid {
            return Err(ProcessError::config(format!(
                "tile {} is not a tile of the process pyramid",
                tile
            )));
        }
        if !self.in_scope(tile) {
            debug!("Tile outside process zoom levels or bounds");
            return Ok(self.output.empty(tile));
        }
        let function = self.function.as_ref().ok_or_else(|| {
            ProcessError::config(format!("process '{}' has no function", self.config.name))
        })?;

        let ctx = TileContext::new(tile, &self.config.params, &self.inputs);
        let data = function.run(&ctx).await?;

        if let TileData::Raster(array) = &data {
            if (array.height, array.width) != tile.shape() {
                return Err(FormatError::encoding(format!(
                    "process output shape ({}, {}) does not match tile shape {:?}",
                    array.height,
                    array.width,
                    tile.shape()
                ))
                .into());
            }
        }
        debug!(empty = data.is_empty(), "Executed process function");
        Ok(data)
    }

    /// Persist process output, unless the run mode forbids writing.
    pub async fn write(&self, tile: &Tile, data: &TileData) -> Result<()> {
        if !self.mode.writes() {
            debug!(tile = %tile, mode = %self.mode, "Not writing in this mode");
            return Ok(());
        }
        self.output.write(tile, data).await?;
        Ok(())
    }

    /// Output for `tile`, read or computed depending on the run mode.
    ///
    /// `tile` may come from another pyramid over the same grid, e.g. a web
    /// tile with metatiling 1. Its data is then assembled from the process
    /// tiles it intersects.
    #[instrument(skip(self, tile), fields(process = %self.config.name, tile = %tile))]
    pub async fn get_raw_output(&self, tile: &Tile) -> Result<TileData> {
        if tile.pyramid.grid != self.config.process_pyramid.grid {
            return Err(ProcessError::config(format!(
                "tile {} uses a different grid than process '{}'",
                tile, self.config.name
            )));
        }
        if !self.in_scope(tile) {
            return Ok(self.output.empty(tile));
        }
        if tile.pyramid == self.config.process_pyramid {
            return self.process_tile_output(tile).await;
        }

        let process_tiles = self.config.process_pyramid.intersecting(tile);
        let mut parts = Vec::with_capacity(process_tiles.len());
        for process_tile in process_tiles {
            let data = self.process_tile_output(&process_tile).await?;
            parts.push((process_tile, data));
        }
        self.assemble(tile, &parts)
    }

    async fn process_tile_output(&self, process_tile: &Tile) -> Result<TileData> {
        match self.mode {
            RunMode::Readonly => self.read_existing(process_tile).await,
            RunMode::Continue => {
                if self.output.tiles_exist(process_tile).await? {
                    debug!(tile = %process_tile, "Output exists, reading");
                    self.read_existing(process_tile).await
                } else {
                    self.compute(process_tile).await
                }
            }
            RunMode::Overwrite | RunMode::Memory => self.compute(process_tile).await,
        }
    }

    async fn compute(&self, process_tile: &Tile) -> Result<TileData> {
        let data = self.execute(process_tile).await?;
        self.write(process_tile, &data).await?;
        Ok(data)
    }

    /// Stored output of a process tile, assembled from its output tiles.
    async fn read_existing(&self, process_tile: &Tile) -> Result<TileData> {
        let output_tiles = self.output.output_tiles(process_tile);
        if output_tiles.len() == 1 && output_tiles[0] == *process_tile {
            return Ok(self.output.read(process_tile).await?);
        }
        let mut parts = Vec::with_capacity(output_tiles.len());
        for output_tile in output_tiles {
            let data = self.output.read(&output_tile).await?;
            parts.push((output_tile, data));
        }
        self.assemble(process_tile, &parts)
    }

    /// Combine data of several tiles of one zoom level into `target`.
    fn assemble(&self, target: &Tile, parts: &[(Tile, TileData)]) -> Result<TileData> {
        let bands = parts
            .iter()
            .filter_map(|(_, data)| data.as_raster())
            .find(|array| !array.is_empty())
            .map(|array| array.bands);

        match self.output.empty(target) {
            TileData::Raster(empty) => {
                let Some(bands) = bands else {
                    return Ok(TileData::Raster(empty));
                };
                let rasters = parts
                    .iter()
                    .filter_map(|(tile, data)| data.as_raster().map(|array| (tile, array)))
                    .filter(|(_, array)| array.bands == bands);
                let fill = empty.data.first().copied().unwrap_or_default();
                Ok(TileData::Raster(mosaic(rasters, target, bands, fill)?))
            }
            TileData::Vector(_) => {
                let target_bounds = target.buffered_bounds();
                let mut features: Vec<Feature> = Vec::new();
                for feature in parts.iter().filter_map(|(_, data)| data.as_features()).flatten() {
                    let inside = feature
                        .bounds()
                        .map(|b| {
                            b.min_x <= target_bounds.max_x
                                && b.max_x >= target_bounds.min_x
                                && b.min_y <= target_bounds.max_y
                                && b.max_y >= target_bounds.min_y
                        })
                        .unwrap_or(false);
                    if inside && !features.contains(feature) {
                        features.push(feature.clone());
                    }
                }
                Ok(TileData::Vector(features))
            }
        }
    }
}

#[async_trait]
impl RawOutputSource for Process {
    async fn get_raw_output(&self, tile: &Tile) -> formats::Result<TileData> {
        Ok(Process::get_raw_output(self, tile).await?)
    }
}

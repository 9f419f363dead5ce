//! PNG_hillshade output: inverted hillshade in the alpha channel of a black
//! image, so tiles can be laid over other maps.
//!
//! Output configuration:
//! - `path` (required): output directory
//! - `old_band_num` (optional): write the legacy 4-band layout (3x gray, 1x
//!   alpha) instead of 2 bands (gray, alpha)

use async_trait::async_trait;
use bytes::Bytes;
use pyramid_common::Tile;
use renderer::png::{create_png, create_png_gray_alpha, decode_png};
use serde_json::{Map, Value};
use storage::ReadOutcome;
use tracing::debug;

use crate::driver::{require_str, OutputFormat, OutputParams, TileStore, WebOutput};
use crate::png::to_u8;
use crate::window::extract;
use crate::{DriverContext, FormatError, MaskedArray, OutputDriver, Result, TileData};

pub const NODATA: f32 = 255.0;

pub fn is_valid_with_config(config: &Map<String, Value>) -> Result<bool> {
    require_str(config, "path")?;
    match config.get("old_band_num") {
        None | Some(Value::Bool(_)) => Ok(true),
        Some(other) => Err(FormatError::config(format!(
            "'old_band_num' must be a boolean, got {}",
            other
        ))),
    }
}

pub struct PngHillshadeOutput {
    store: TileStore,
    old_band_num: bool,
}

impl PngHillshadeOutput {
    pub fn new(params: OutputParams, ctx: DriverContext) -> Result<Self> {
        is_valid_with_config(&params.config)?;
        let old_band_num = params
            .config
            .get("old_band_num")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Ok(Self {
            store: TileStore::open(&params, ctx)?,
            old_band_num,
        })
    }

    /// Number of bands in stored files.
    pub fn band_count(&self) -> usize {
        if self.old_band_num {
            4
        } else {
            2
        }
    }

    /// Encode the first band as `255 - value` alpha over black.
    fn encode(&self, array: &MaskedArray) -> Result<Vec<u8>> {
        let size = array.height * array.width;
        let alpha = array
            .band_values(0)
            .iter()
            .zip(array.band_mask(0))
            .map(|(v, masked)| if *masked { 0 } else { 255 - to_u8(*v) });

        let png = if self.old_band_num {
            let mut pixels = Vec::with_capacity(size * 4);
            for a in alpha {
                pixels.extend_from_slice(&[0, 0, 0, a]);
            }
            create_png(&pixels, array.width, array.height)?
        } else {
            let mut pixels = Vec::with_capacity(size * 2);
            for a in alpha {
                pixels.extend_from_slice(&[0, a]);
            }
            create_png_gray_alpha(&pixels, array.width, array.height)?
        };
        Ok(png)
    }
}

fn first_band(data: &TileData) -> Result<MaskedArray> {
    match data.as_raster() {
        Some(array) if array.bands > 0 => Ok(array.band(0)),
        Some(_) => Err(FormatError::encoding("hillshade data has no bands")),
        None => Err(FormatError::encoding(
            "raster output requires raster data, got features",
        )),
    }
}

#[async_trait]
impl OutputDriver for PngHillshadeOutput {
    fn format(&self) -> OutputFormat {
        OutputFormat::PngHillshade
    }

    fn store(&self) -> &TileStore {
        &self.store
    }

    fn is_valid_with_config(&self, config: &Map<String, Value>) -> Result<bool> {
        is_valid_with_config(config)
    }

    async fn write(&self, process_tile: &Tile, data: &TileData) -> Result<()> {
        let array = first_band(data)?;
        if array.is_empty() {
            debug!(parent: &self.store.ctx().span, tile = %process_tile, "data empty, nothing to write");
            return Ok(());
        }

        for out_tile in self.output_tiles(process_tile) {
            let window = extract(&array, process_tile, &out_tile, NODATA)?;
            if window.is_empty() {
                continue;
            }
            let png = self.encode(&window)?;
            self.store.write_tile(&out_tile, Bytes::from(png)).await?;
        }
        Ok(())
    }

    /// Re-inverted hillshade; fully transparent pixels are masked.
    async fn read(&self, output_tile: &Tile) -> Result<TileData> {
        let bytes = match self.store.read_tile(output_tile).await? {
            ReadOutcome::Found(bytes) => bytes,
            ReadOutcome::NotFound => return Ok(self.empty(output_tile)),
        };

        let decoded = decode_png(&bytes)?;
        let alpha_channel = self.band_count() - 1;
        if decoded.channels != self.band_count() {
            return Err(FormatError::encoding(format!(
                "stored tile {} has {} bands, expected {}",
                output_tile,
                decoded.channels,
                self.band_count()
            )));
        }

        let alpha: Vec<u8> = decoded
            .pixels
            .iter()
            .skip(alpha_channel)
            .step_by(decoded.channels)
            .copied()
            .collect();
        let values = alpha.iter().map(|a| (255 - a) as f32).collect();
        let mask = alpha.iter().map(|a| *a == 0).collect();

        let array = MaskedArray::new(1, decoded.height, decoded.width, values, mask)?;
        Ok(TileData::Raster(array))
    }

    fn empty(&self, tile: &Tile) -> TileData {
        let (height, width) = tile.shape();
        TileData::Raster(MaskedArray::masked(1, height, width, 0.0))
    }

    fn for_web(&self, data: &TileData) -> Result<WebOutput> {
        let png = self.encode(&first_band(data)?)?;
        Ok(WebOutput::Image {
            bytes: Bytes::from(png),
            mime: "image/png",
        })
    }
}

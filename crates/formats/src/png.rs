//! PNG output: 8-bit RGBA tiles.
//!
//! Output configuration:
//! - `path` (required): output directory
//! - `nodata` (optional, default 0): value treated as no-data
//! - `bands` (optional, default 4): band count of empty tiles

use async_trait::async_trait;
use bytes::Bytes;
use pyramid_common::Tile;
use renderer::png::{create_png, decode_png};
use serde_json::{Map, Value};
use storage::ReadOutcome;
use tracing::debug;

use crate::driver::{optional_f32, require_str, OutputFormat, OutputParams, TileStore, WebOutput};
use crate::window::extract;
use crate::{DriverContext, FormatError, MaskedArray, OutputDriver, Result, TileData};

pub const DEFAULT_NODATA: f32 = 0.0;
pub const DEFAULT_BANDS: usize = 4;

/// Check `path`, `nodata` and `bands`.
pub fn is_valid_with_config(config: &Map<String, Value>) -> Result<bool> {
    require_str(config, "path")?;
    optional_f32(config, "nodata", DEFAULT_NODATA)?;
    band_count(config)?;
    Ok(true)
}

fn band_count(config: &Map<String, Value>) -> Result<usize> {
    match config.get("bands") {
        None | Some(Value::Null) => Ok(DEFAULT_BANDS),
        Some(value) => match value.as_u64() {
            Some(bands @ 1..=4) => Ok(bands as usize),
            _ => Err(FormatError::config(format!(
                "'bands' must be an integer from 1 to 4, got {}",
                value
            ))),
        },
    }
}

/// Quantize to 8 bit.
pub(crate) fn to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

fn check_band_count(bands: usize) -> Result<()> {
    match bands {
        1..=4 => Ok(()),
        n => Err(FormatError::encoding(format!("invalid number of bands: {}", n))),
    }
}

/// Compose interleaved RGBA from 1 to 4 bands.
///
/// - 1 band: gray replicated to RGB, alpha 0 where the value is masked or `nodata`
/// - 2 bands: gray + alpha
/// - 3 bands: RGB, alpha 0 where the first band is masked or `nodata`
/// - 4 bands: RGBA as is
///
/// Alpha is decided on the unquantized values, so `nodata` outside 0..=255
/// still marks transparent pixels.
pub fn prepare_rgba(array: &MaskedArray, nodata: f32) -> Result<Vec<u8>> {
    check_band_count(array.bands)?;
    let raw = array.filled_values(nodata);
    let values: Vec<u8> = raw.iter().copied().map(to_u8).collect();
    let size = array.height * array.width;
    let band = |b: usize, i: usize| values[b * size + i];
    let alpha_of = |i: usize| if array.mask[i] || raw[i] == nodata { 0 } else { 255 };

    let mut rgba = Vec::with_capacity(size * 4);
    for i in 0..size {
        let pixel = match array.bands {
            1 => [band(0, i), band(0, i), band(0, i), alpha_of(i)],
            2 => [band(0, i), band(0, i), band(0, i), band(1, i)],
            3 => [band(0, i), band(1, i), band(2, i), alpha_of(i)],
            _ => [band(0, i), band(1, i), band(2, i), band(3, i)],
        };
        rgba.extend_from_slice(&pixel);
    }
    Ok(rgba)
}

pub struct PngOutput {
    store: TileStore,
    nodata: f32,
    bands: usize,
}

impl PngOutput {
    pub fn new(params: OutputParams, ctx: DriverContext) -> Result<Self> {
        is_valid_with_config(&params.config)?;
        let nodata = optional_f32(&params.config, "nodata", DEFAULT_NODATA)?;
        let bands = band_count(&params.config)?;
        Ok(Self {
            store: TileStore::open(&params, ctx)?,
            nodata,
            bands,
        })
    }

    pub fn nodata(&self) -> f32 {
        self.nodata
    }

    fn encode(&self, array: &MaskedArray) -> Result<Vec<u8>> {
        let rgba = prepare_rgba(array, self.nodata)?;
        Ok(create_png(&rgba, array.width, array.height)?)
    }
}

fn expect_raster(data: &TileData) -> Result<&MaskedArray> {
    data.as_raster()
        .ok_or_else(|| FormatError::encoding("raster output requires raster data, got features"))
}

#[async_trait]
impl OutputDriver for PngOutput {
    fn format(&self) -> OutputFormat {
        OutputFormat::Png
    }

    fn store(&self) -> &TileStore {
        &self.store
    }

    fn is_valid_with_config(&self, config: &Map<String, Value>) -> Result<bool> {
        is_valid_with_config(config)
    }

    async fn write(&self, process_tile: &Tile, data: &TileData) -> Result<()> {
        let array = expect_raster(data)?;
        if array.is_empty() {
            debug!(parent: &self.store.ctx().span, tile = %process_tile, "data empty, nothing to write");
            return Ok(());
        }
        check_band_count(array.bands)?;

        for out_tile in self.output_tiles(process_tile) {
            let window = extract(array, process_tile, &out_tile, self.nodata)?;
            if window.is_empty() {
                continue;
            }
            let png = self.encode(&window)?;
            self.store.write_tile(&out_tile, Bytes::from(png)).await?;
        }
        Ok(())
    }

    async fn read(&self, output_tile: &Tile) -> Result<TileData> {
        let bytes = match self.store.read_tile(output_tile).await? {
            ReadOutcome::Found(bytes) => bytes,
            ReadOutcome::NotFound => return Ok(self.empty(output_tile)),
        };

        let decoded = decode_png(&bytes)?;
        if (decoded.height, decoded.width) != output_tile.shape() {
            return Err(FormatError::encoding(format!(
                "stored tile {} has shape ({}, {}), expected {:?}",
                output_tile,
                decoded.height,
                decoded.width,
                output_tile.shape()
            )));
        }

        let size = decoded.width * decoded.height;
        let mut values = Vec::with_capacity(decoded.channels * size);
        for channel in 0..decoded.channels {
            values.extend(
                decoded
                    .pixels
                    .iter()
                    .skip(channel)
                    .step_by(decoded.channels)
                    .map(|v| *v as f32),
            );
        }
        let mut array = MaskedArray::from_values(
            decoded.channels,
            decoded.height,
            decoded.width,
            values,
            Some(self.nodata),
        )?;
        // transparent pixels are no-data in every band
        if matches!(decoded.channels, 2 | 4) {
            let alpha = (decoded.channels - 1) * size;
            for i in 0..size {
                if array.data[alpha + i] == 0.0 {
                    for b in 0..decoded.channels {
                        array.mask[b * size + i] = true;
                    }
                }
            }
        }
        Ok(TileData::Raster(array))
    }

    fn empty(&self, tile: &Tile) -> TileData {
        let (height, width) = tile.shape();
        TileData::Raster(MaskedArray::masked(self.bands, height, width, self.nodata))
    }

    fn for_web(&self, data: &TileData) -> Result<WebOutput> {
        let png = self.encode(expect_raster(data)?)?;
        Ok(WebOutput::Image {
            bytes: Bytes::from(png),
            mime: "image/png",
        })
    }
}

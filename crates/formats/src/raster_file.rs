//! Raster file input.
//!
//! Decoding is behind [`RasterReader`]. The built-in [`ImageRasterReader`]
//! reads PNG, TIFF and JPEG through the `image` crate and takes its
//! georeferencing from an ESRI world file next to the image, with the CRS
//! given in the input configuration.

use pyramid_common::tile::Affine;
use pyramid_common::{BoundingBox, CrsCode, Tile, TilePyramid};
use std::collections::HashMap;
use std::sync::Arc;
use storage::{ReadOutcome, StorageBackend};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{DriverContext, FormatError, MaskedArray, Result};

/// Georeferencing and layout of a source raster.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterProfile {
    pub width: usize,
    pub height: usize,
    pub count: usize,
    pub crs: CrsCode,
    pub affine: Affine,
    pub nodata: Option<f32>,
}

impl RasterProfile {
    pub fn bounds(&self) -> BoundingBox {
        BoundingBox::new(
            self.affine.left,
            self.affine.top - self.height as f64 * self.affine.pixel_y_size,
            self.affine.left + self.width as f64 * self.affine.pixel_x_size,
            self.affine.top,
        )
    }
}

/// Decoded access to a source raster in its native grid.
pub trait RasterReader: Send + Sync {
    fn profile(&self) -> &RasterProfile;

    /// Band by 1-based index.
    fn read_band(&self, index: usize) -> Result<&MaskedArray>;
}

// ============================================================================
// Image + world file reader
// ============================================================================

/// Parse an ESRI world file (`A D B E C F`, one per line).
pub fn parse_world_file(text: &str) -> Result<Affine> {
    let values: Vec<f64> = text
        .split_whitespace()
        .map(|v| {
            v.parse::<f64>()
                .map_err(|_| FormatError::config(format!("invalid world file value '{}'", v)))
        })
        .collect::<Result<_>>()?;
    let &[a, d, b, e, c, f] = values.as_slice() else {
        return Err(FormatError::config(format!(
            "world file needs 6 values, got {}",
            values.len()
        )));
    };
    if d != 0.0 || b != 0.0 {
        return Err(FormatError::config("rotated world files are not supported"));
    }
    if a <= 0.0 || e >= 0.0 {
        return Err(FormatError::config("world file must describe a north-up grid"));
    }
    // C and F locate the center of the upper left pixel.
    Ok(Affine {
        pixel_x_size: a,
        pixel_y_size: -e,
        left: c - a / 2.0,
        top: f - e / 2.0,
    })
}

/// Sidecar candidates for `path`: `dem.pgw`, `dem.pngw`, `dem.wld`.
pub fn world_file_candidates(path: &str) -> Vec<String> {
    let file_start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    let Some(dot) = path[file_start..].rfind('.').map(|i| file_start + i) else {
        return vec![format!("{}.wld", path)];
    };
    let (stem, ext) = (&path[..dot], &path[dot + 1..]);
    let mut candidates = Vec::new();
    if let (Some(first), Some(last)) = (ext.chars().next(), ext.chars().last()) {
        candidates.push(format!("{}.{}{}w", stem, first, last));
    }
    candidates.push(format!("{}.{}w", stem, ext));
    candidates.push(format!("{}.wld", stem));
    candidates
}

/// In-memory raster decoded by the `image` crate.
///
/// An alpha channel becomes the mask of all other bands.
pub struct ImageRasterReader {
    profile: RasterProfile,
    bands: Vec<MaskedArray>,
}

impl ImageRasterReader {
    pub fn from_bytes(data: &[u8], affine: Affine, crs: CrsCode, nodata: Option<f32>) -> Result<Self> {
        let image = image::load_from_memory(data)
            .map_err(|e| FormatError::encoding(format!("cannot decode raster: {}", e)))?;
        let (width, height) = (image.width() as usize, image.height() as usize);
        let has_alpha = image.color().has_alpha();
        let channels = image.color().channel_count() as usize;

        let pixels = match channels {
            1 => image.to_luma8().into_raw(),
            2 => image.to_luma_alpha8().into_raw(),
            3 => image.to_rgb8().into_raw(),
            _ => image.to_rgba8().into_raw(),
        };
        let channels = channels.min(4);
        let count = if has_alpha { channels - 1 } else { channels };

        let alpha_mask: Vec<bool> = if has_alpha {
            pixels.iter().skip(channels - 1).step_by(channels).map(|a| *a == 0).collect()
        } else {
            vec![false; width * height]
        };

        let mut bands = Vec::with_capacity(count);
        for band in 0..count {
            let values: Vec<f32> = pixels.iter().skip(band).step_by(channels).map(|v| *v as f32).collect();
            let mask = values
                .iter()
                .zip(&alpha_mask)
                .map(|(v, alpha)| *alpha || Some(*v) == nodata)
                .collect();
            bands.push(MaskedArray::new(1, height, width, values, mask)?);
        }

        Ok(Self {
            profile: RasterProfile {
                width,
                height,
                count,
                crs,
                affine,
                nodata,
            },
            bands,
        })
    }
}

impl RasterReader for ImageRasterReader {
    fn profile(&self) -> &RasterProfile {
        &self.profile
    }

    fn read_band(&self, index: usize) -> Result<&MaskedArray> {
        index
            .checked_sub(1)
            .and_then(|i| self.bands.get(i))
            .ok_or_else(|| {
                FormatError::config(format!(
                    "band index {} out of range 1..={}",
                    index, self.profile.count
                ))
            })
    }
}

// ============================================================================
// Input
// ============================================================================

/// A raster file configured as process input.
pub struct RasterFileInput {
    path: String,
    reader: Arc<dyn RasterReader>,
    backend: StorageBackend,
    ctx: DriverContext,
}

impl RasterFileInput {
    /// Read and decode `path` and its world file through the storage backend.
    pub async fn load(path: &str, crs: CrsCode, nodata: Option<f32>, ctx: DriverContext) -> Result<Self> {
        let backend = StorageBackend::open(path, &ctx.storage)?;

        let data = match backend.read_bytes(path).await? {
            ReadOutcome::Found(data) => data,
            ReadOutcome::NotFound => {
                return Err(FormatError::config(format!("input file {} does not exist", path)))
            }
        };

        let mut affine = None;
        for candidate in world_file_candidates(path) {
            if let ReadOutcome::Found(text) = backend.read_bytes(&candidate).await? {
                affine = Some(parse_world_file(&String::from_utf8_lossy(&text))?);
                debug!(parent: &ctx.span, world_file = %candidate, "Found world file");
                break;
            }
        }
        let affine = affine.ok_or_else(|| {
            FormatError::config(format!("no world file found for {}", path))
        })?;

        let reader = ImageRasterReader::from_bytes(&data, affine, crs, nodata)?;
        debug!(
            parent: &ctx.span,
            width = reader.profile.width,
            height = reader.profile.height,
            bands = reader.profile.count,
            "Loaded raster file"
        );
        Ok(Self {
            path: path.to_string(),
            reader: Arc::new(reader),
            backend,
            ctx,
        })
    }

    /// Input over an already opened reader.
    pub fn from_reader(path: &str, reader: Arc<dyn RasterReader>, ctx: DriverContext) -> Result<Self> {
        Ok(Self {
            path: path.to_string(),
            reader,
            backend: StorageBackend::open(path, &ctx.storage)?,
            ctx,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn profile(&self) -> &RasterProfile {
        self.reader.profile()
    }

    /// Footprint in the pyramid CRS, segmentized before reprojection when
    /// CRSes differ.
    pub fn bbox(&self, pyramid: &TilePyramid) -> Result<BoundingBox> {
        let profile = self.profile();
        let segment = profile.affine.pixel_x_size * pyramid.tile_size as f64;
        Ok(profile.crs.transform_bounds(pyramid.crs(), &profile.bounds(), segment)?)
    }

    pub async fn exists(&self) -> Result<bool> {
        Ok(self.backend.exists(&self.path).await?)
    }

    /// Bind the raster to a tile for reading.
    pub fn open(&self, tile: Tile) -> RasterInputTile {
        debug!(parent: &self.ctx.span, tile = %tile, "Opening raster input tile");
        RasterInputTile {
            tile,
            reader: self.reader.clone(),
            cache: Mutex::new(HashMap::new()),
        }
    }
}

/// A raster file resampled onto one tile, cached per band.
pub struct RasterInputTile {
    tile: Tile,
    reader: Arc<dyn RasterReader>,
    cache: Mutex<HashMap<usize, MaskedArray>>,
}

impl RasterInputTile {
    pub fn tile(&self) -> &Tile {
        &self.tile
    }

    fn band_indexes(&self, indexes: &[usize]) -> Vec<usize> {
        if indexes.is_empty() {
            (1..=self.reader.profile().count).collect()
        } else {
            indexes.to_vec()
        }
    }

    /// Nearest-neighbour resample of one source band onto the tile grid.
    fn resample(&self, index: usize) -> Result<MaskedArray> {
        let source = self.reader.read_band(index)?;
        let profile = self.reader.profile();
        let (height, width) = self.tile.shape();
        let affine = self.tile.affine();
        let (tile_crs, source_crs) = (self.tile.crs(), profile.crs);
        let mut out = MaskedArray::masked(1, height, width, profile.nodata.unwrap_or(0.0));

        for row in 0..height {
            for col in 0..width {
                let (x, y) = affine.pixel_center(col, row);
                let (sx, sy) = tile_crs.transform_point(source_crs, x, y)?;
                let (src_col, src_row) = profile.affine.pixel_of(sx, sy);
                if src_col < 0.0 || src_row < 0.0 {
                    continue;
                }
                let (src_col, src_row) = (src_col.floor() as usize, src_row.floor() as usize);
                if src_col >= profile.width || src_row >= profile.height {
                    continue;
                }
                let (value, masked) = source.get(0, src_row, src_col);
                out.set(0, row, col, value, masked);
            }
        }
        Ok(out)
    }

    /// Bands by 1-based index (all bands for an empty slice), stacked.
    pub async fn read(&self, indexes: &[usize]) -> Result<MaskedArray> {
        let mut cache = self.cache.lock().await;
        let mut bands = Vec::new();
        for index in self.band_indexes(indexes) {
            if !cache.contains_key(&index) {
                let band = self.resample(index)?;
                cache.insert(index, band);
            }
            if let Some(band) = cache.get(&index) {
                bands.push(band.clone());
            }
        }
        MaskedArray::stack(bands)
    }

    /// True when the tile misses the raster footprint or all requested
    /// bands are masked.
    pub async fn is_empty(&self, indexes: &[usize]) -> Result<bool> {
        let profile = self.reader.profile();
        let segment = profile.affine.pixel_x_size * self.tile.pyramid.tile_size as f64;
        let footprint = profile
            .crs
            .transform_bounds(self.tile.crs(), &profile.bounds(), segment)?;
        if !self.tile.bounds().intersects(&footprint) {
            return Ok(true);
        }
        Ok(self.read(indexes).await?.is_empty())
    }
}

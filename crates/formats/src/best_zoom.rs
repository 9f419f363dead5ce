//! Finest zoom level at which a source raster is not oversampled.

use pyramid_common::TilePyramid;

use crate::raster_file::RasterProfile;
use crate::{FormatError, Result};

/// Highest zoom to scan.
pub const MAX_ZOOM: u32 = 40;

/// Return the zoom before the first zoom in `min_zoom..=max_zoom` whose pixel
/// size is at or below the source's average resolution in the pyramid CRS.
///
/// The footprint is segmentized with `source pixel size * tile size` before
/// reprojection. The result is never below `min_zoom`.
pub fn get_best_zoom_level(
    profile: &RasterProfile,
    pyramid: &TilePyramid,
    min_zoom: u32,
    max_zoom: u32,
) -> Result<u32> {
    let segment = profile.affine.pixel_x_size * pyramid.tile_size as f64;
    let footprint = profile
        .crs
        .transform_bounds(pyramid.crs(), &profile.bounds(), segment)?;

    let (width, height) = (profile.width as f64, profile.height as f64);
    let x_resolution = footprint.width() / width;
    let y_resolution = footprint.height() / height;
    let avg_resolution =
        x_resolution * (width / (width + height)) + y_resolution * (height / (width + height));

    for zoom in min_zoom..=max_zoom.min(MAX_ZOOM) {
        if pyramid.pixel_x_size(zoom) <= avg_resolution {
            return Ok(zoom.saturating_sub(1).max(min_zoom));
        }
    }
    Err(FormatError::NoSuitableZoom {
        min: min_zoom,
        max: max_zoom,
    })
}

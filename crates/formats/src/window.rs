//! Moving raster windows between tiles of the same grid and zoom level.
//!
//! Pixel grids of tiles at one zoom level are aligned, so windows are copied
//! by integer pixel offsets without resampling.

use pyramid_common::Tile;

use crate::{FormatError, MaskedArray, Result};

/// Pixel offset `(col, row)` of `dst`'s buffered origin within `src`'s grid.
fn pixel_offset(src: &Tile, dst: &Tile) -> Result<(i64, i64)> {
    if src.zoom() != dst.zoom() || src.pyramid.grid != dst.pyramid.grid {
        return Err(FormatError::config(format!(
            "cannot copy pixels from tile {} to tile {} of a different grid or zoom",
            src, dst
        )));
    }
    let (src_affine, dst_affine) = (src.affine(), dst.affine());
    let col = ((dst_affine.left - src_affine.left) / src_affine.pixel_x_size).round() as i64;
    let row = ((src_affine.top - dst_affine.top) / src_affine.pixel_y_size).round() as i64;
    Ok((col, row))
}

fn check_shape(array: &MaskedArray, tile: &Tile) -> Result<()> {
    if (array.height, array.width) != tile.shape() {
        return Err(FormatError::encoding(format!(
            "array shape ({}, {}) does not match tile {} shape {:?}",
            array.height,
            array.width,
            tile,
            tile.shape()
        )));
    }
    Ok(())
}

/// Copy unmasked pixels of `src` (covering `src_tile`) into `dst`
/// (covering `dst_tile`). Pixels outside the overlap are left untouched.
pub fn paste(dst: &mut MaskedArray, dst_tile: &Tile, src: &MaskedArray, src_tile: &Tile) -> Result<()> {
    check_shape(src, src_tile)?;
    check_shape(dst, dst_tile)?;
    if src.bands != dst.bands {
        return Err(FormatError::encoding(format!(
            "cannot paste {} bands into {} bands",
            src.bands, dst.bands
        )));
    }

    let (col_off, row_off) = pixel_offset(src_tile, dst_tile)?;
    for band in 0..dst.bands {
        for row in 0..dst.height {
            let src_row = row as i64 + row_off;
            if src_row < 0 || src_row >= src.height as i64 {
                continue;
            }
            for col in 0..dst.width {
                let src_col = col as i64 + col_off;
                if src_col < 0 || src_col >= src.width as i64 {
                    continue;
                }
                let (value, masked) = src.get(band, src_row as usize, src_col as usize);
                if !masked {
                    dst.set(band, row, col, value, false);
                }
            }
        }
    }
    Ok(())
}

/// Window of `src` shaped like `dst_tile`. Pixels not covered by `src_tile`
/// are masked and hold `fill`.
pub fn extract(src: &MaskedArray, src_tile: &Tile, dst_tile: &Tile, fill: f32) -> Result<MaskedArray> {
    let (height, width) = dst_tile.shape();
    let mut dst = MaskedArray::masked(src.bands, height, width, fill);
    paste(&mut dst, dst_tile, src, src_tile)?;
    Ok(dst)
}

/// Combine several tiles into one array shaped like `dst_tile`.
pub fn mosaic<'a, I>(parts: I, dst_tile: &Tile, bands: usize, fill: f32) -> Result<MaskedArray>
where
    I: IntoIterator<Item = (&'a Tile, &'a MaskedArray)>,
{
    let (height, width) = dst_tile.shape();
    let mut dst = MaskedArray::masked(bands, height, width, fill);
    for (tile, array) in parts {
        paste(&mut dst, dst_tile, array, tile)?;
    }
    Ok(dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyramid_common::{GridDefinition, TilePyramid};

    fn numbered(tile: &Tile) -> MaskedArray {
        let (height, width) = tile.shape();
        let data = (0..height * width).map(|i| i as f32).collect();
        MaskedArray::new(1, height, width, data, vec![false; height * width]).unwrap()
    }

    #[test]
    fn test_extract_sub_tile_from_metatile() {
        let process = TilePyramid::new(GridDefinition::geodetic(), 2, 0).unwrap();
        let output = TilePyramid::new(GridDefinition::geodetic(), 1, 0).unwrap();
        let process_tile = process.tile(3, 1, 1).unwrap();
        let data = numbered(&process_tile);

        let out_tile = output.tile(3, 3, 3).unwrap();
        let window = extract(&data, &process_tile, &out_tile, 0.0).unwrap();

        assert_eq!(window.shape(), (1, 256, 256));
        assert!(!window.is_empty());
        // out tile is the lower right quarter of the metatile
        assert_eq!(window.get(0, 0, 0).0, (256 * 512 + 256) as f32);
    }

    #[test]
    fn test_extract_outside_source_is_masked() {
        let pyramid = TilePyramid::new(GridDefinition::geodetic(), 1, 0).unwrap();
        let buffered = TilePyramid::new(GridDefinition::geodetic(), 1, 4).unwrap();
        let src_tile = pyramid.tile(4, 5, 5).unwrap();
        let dst_tile = buffered.tile(4, 5, 5).unwrap();

        let window = extract(&numbered(&src_tile), &src_tile, &dst_tile, 0.0).unwrap();
        assert_eq!(window.shape(), (1, 264, 264));
        assert!(window.get(0, 0, 0).1);
        assert_eq!(window.get(0, 4, 4), (0.0, false));
    }

    #[test]
    fn test_mosaic_neighbours() {
        let pyramid = TilePyramid::new(GridDefinition::geodetic(), 1, 0).unwrap();
        let meta = TilePyramid::new(GridDefinition::geodetic(), 2, 0).unwrap();
        let left = pyramid.tile(2, 0, 0).unwrap();
        let right = pyramid.tile(2, 0, 1).unwrap();
        let target = meta.tile(2, 0, 0).unwrap();

        let (left_data, right_data) = (numbered(&left), numbered(&right));
        let result = mosaic([(&left, &left_data), (&right, &right_data)], &target, 1, 0.0).unwrap();

        assert_eq!(result.shape(), (1, 512, 512));
        assert_eq!(result.get(0, 0, 256), (0.0, false));
        assert!(result.get(0, 300, 0).1);
    }

    #[test]
    fn test_shape_mismatch() {
        let pyramid = TilePyramid::new(GridDefinition::geodetic(), 1, 0).unwrap();
        let tile = pyramid.tile(1, 0, 0).unwrap();
        let wrong = MaskedArray::masked(1, 10, 10, 0.0);
        assert!(extract(&wrong, &tile, &tile, 0.0).is_err());
    }
}

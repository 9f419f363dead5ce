//! PNG encoding for tile pixel data.
//!
//! Supports two encoding modes:
//! - **RGBA PNG (color type 6)**: multi-band raster tiles.
//! - **Gray + alpha PNG (color type 4)**: single-value tiles such as hillshades.
//!
//! Decoding goes through the `image` crate and returns interleaved 8-bit
//! samples with the channel count found in the file.

use image::ImageFormat;
use std::io::Write;
use thiserror::Error;
use tracing::debug;

const PNG_SIGNATURE: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];

const COLOR_TYPE_GRAY_ALPHA: u8 = 4;
const COLOR_TYPE_RGBA: u8 = 6;

#[derive(Debug, Error)]
pub enum PngError {
    #[error("Pixel buffer has {actual} bytes, expected {expected} for {width}x{height}x{channels}")]
    BufferSize {
        width: usize,
        height: usize,
        channels: usize,
        expected: usize,
        actual: usize,
    },

    #[error("IDAT compression failed: {0}")]
    Compression(#[from] std::io::Error),

    #[error("PNG decoding failed: {0}")]
    Decode(#[from] image::ImageError),
}

/// Decoded PNG samples, row-major and channel-interleaved.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPng {
    pub width: usize,
    pub height: usize,
    /// 1 (gray), 2 (gray + alpha), 3 (RGB) or 4 (RGBA)
    pub channels: usize,
    pub pixels: Vec<u8>,
}

impl DecodedPng {
    /// Sample of `channel` at pixel `(row, col)`.
    pub fn sample(&self, channel: usize, row: usize, col: usize) -> u8 {
        self.pixels[(row * self.width + col) * self.channels + channel]
    }
}

/// Create a PNG image from RGBA pixel data (color type 6).
///
/// # Arguments
/// - `pixels`: RGBA pixel data (4 bytes per pixel)
/// - `width`: Image width in pixels
/// - `height`: Image height in pixels
pub fn create_png(pixels: &[u8], width: usize, height: usize) -> Result<Vec<u8>, PngError> {
    encode(pixels, width, height, 4, COLOR_TYPE_RGBA)
}

/// Create a PNG image from gray + alpha pixel data (color type 4).
pub fn create_png_gray_alpha(
    pixels: &[u8],
    width: usize,
    height: usize,
) -> Result<Vec<u8>, PngError> {
    encode(pixels, width, height, 2, COLOR_TYPE_GRAY_ALPHA)
}

fn encode(
    pixels: &[u8],
    width: usize,
    height: usize,
    channels: usize,
    color_type: u8,
) -> Result<Vec<u8>, PngError> {
    let expected = width * height * channels;
    if pixels.len() != expected {
        return Err(PngError::BufferSize {
            width,
            height,
            channels,
            expected,
            actual: pixels.len(),
        });
    }

    let mut png = Vec::new();
    png.extend_from_slice(&PNG_SIGNATURE);

    // IHDR chunk
    let mut ihdr_data = Vec::with_capacity(13);
    ihdr_data.extend_from_slice(&(width as u32).to_be_bytes());
    ihdr_data.extend_from_slice(&(height as u32).to_be_bytes());
    ihdr_data.push(8); // bit depth
    ihdr_data.push(color_type);
    ihdr_data.push(0); // compression method
    ihdr_data.push(0); // filter method
    ihdr_data.push(0); // interlace method
    write_chunk(&mut png, b"IHDR", &ihdr_data);

    let idat_data = deflate_scanlines(pixels, width * channels, height)?;
    write_chunk(&mut png, b"IDAT", &idat_data);

    write_chunk(&mut png, b"IEND", &[]);

    debug!(width, height, channels, size = png.len(), "Encoded PNG");
    Ok(png)
}

/// Write a PNG chunk
fn write_chunk(png: &mut Vec<u8>, chunk_type: &[u8; 4], data: &[u8]) {
    png.extend_from_slice(&(data.len() as u32).to_be_bytes());
    png.extend_from_slice(chunk_type);
    png.extend_from_slice(data);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(chunk_type);
    hasher.update(data);
    png.extend_from_slice(&hasher.finalize().to_be_bytes());
}

/// Prefix every scanline with filter byte 0 and zlib-compress.
fn deflate_scanlines(pixels: &[u8], row_bytes: usize, height: usize) -> std::io::Result<Vec<u8>> {
    let mut uncompressed = Vec::with_capacity(height * (1 + row_bytes));
    for row in pixels.chunks_exact(row_bytes.max(1)).take(height) {
        uncompressed.push(0); // filter type: none
        uncompressed.extend_from_slice(row);
    }

    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::fast());
    encoder.write_all(&uncompressed)?;
    encoder.finish()
}

/// Decode an 8-bit PNG, keeping its channel layout.
pub fn decode_png(data: &[u8]) -> Result<DecodedPng, PngError> {
    let image = image::load_from_memory_with_format(data, ImageFormat::Png)?;
    let (width, height) = (image.width() as usize, image.height() as usize);
    let channels = image.color().channel_count() as usize;

    let pixels = match channels {
        1 => image.to_luma8().into_raw(),
        2 => image.to_luma_alpha8().into_raw(),
        3 => image.to_rgb8().into_raw(),
        _ => image.to_rgba8().into_raw(),
    };

    Ok(DecodedPng {
        width,
        height,
        channels: channels.min(4),
        pixels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_png_signature_and_chunks() {
        let pixels = [255u8, 0, 0, 255, 0, 255, 0, 128];
        let png = create_png(&pixels, 2, 1).unwrap();

        assert_eq!(&png[..8], &PNG_SIGNATURE);
        assert_eq!(&png[12..16], b"IHDR");
        assert_eq!(png[25], COLOR_TYPE_RGBA);
        assert_eq!(&png[png.len() - 8..png.len() - 4], b"IEND");
    }

    #[test]
    fn test_rejects_short_buffer() {
        let result = create_png(&[0u8; 7], 2, 1);
        assert!(matches!(result, Err(PngError::BufferSize { expected: 8, .. })));
    }

    #[test]
    fn test_decode_rgba() {
        let pixels: Vec<u8> = (0..4 * 4 * 4).map(|i| i as u8).collect();
        let png = create_png(&pixels, 4, 4).unwrap();

        let decoded = decode_png(&png).unwrap();
        assert_eq!((decoded.width, decoded.height, decoded.channels), (4, 4, 4));
        assert_eq!(decoded.pixels, pixels);
        assert_eq!(decoded.sample(3, 1, 2), pixels[(4 + 2) * 4 + 3]);
    }

    #[test]
    fn test_decode_gray_alpha() {
        let pixels = [10u8, 255, 20, 0, 30, 255, 40, 255];
        let png = create_png_gray_alpha(&pixels, 2, 2).unwrap();

        let decoded = decode_png(&png).unwrap();
        assert_eq!(decoded.channels, 2);
        assert_eq!(decoded.pixels, pixels);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(matches!(decode_png(b"not a png"), Err(PngError::Decode(_))));
    }
}

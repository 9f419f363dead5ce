//! Image encoding for raster tiles.
//!
//! - [`png::create_png`]: 8-bit RGBA
//! - [`png::create_png_gray_alpha`]: 8-bit gray + alpha
//! - [`png::decode_png`]: any 8-bit PNG back into interleaved channels

pub mod png;

pub use png::{DecodedPng, PngError};

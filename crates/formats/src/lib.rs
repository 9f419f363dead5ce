//! Drivers that read and write tile pyramid data.
//!
//! Every output format implements [`OutputDriver`]:
//! - `GeoJSON`: one FeatureCollection file per tile (geodetic grids only)
//! - `PNG`: 8-bit RGBA tiles composed from 1 to 4 bands
//! - `PNG_hillshade`: inverted values stored in the alpha channel of a black image
//!
//! Inputs are either raster files ([`raster_file`]) or the output of another
//! process read through [`InputTile`].

pub mod best_zoom;
pub mod chained;
pub mod context;
pub mod data;
pub mod driver;
pub mod error;
pub mod geojson;
pub mod metadata;
pub mod png;
pub mod png_hillshade;
pub mod raster_file;
pub mod window;

pub use best_zoom::get_best_zoom_level;
pub use chained::{InputTile, RawOutputSource, ReadThroughCache};
pub use context::DriverContext;
pub use data::{Feature, MaskedArray, TileData};
pub use driver::{load_output_driver, OutputDriver, OutputFormat, OutputParams, WebOutput};
pub use error::{FormatError, Result};
pub use metadata::OutputMetadata;

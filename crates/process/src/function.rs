//! The per-tile computation interface.

use async_trait::async_trait;
use formats::raster_file::RasterInputTile;
use formats::{InputTile, TileData};
use pyramid_common::Tile;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::process::ProcessInput;
use crate::{ProcessError, Result};

/// User computation producing the data of one process tile.
///
/// Raster results must match the buffered shape of the tile.
#[async_trait]
pub trait TileFunction: Send + Sync {
    async fn run(&self, ctx: &TileContext<'_>) -> Result<TileData>;
}

/// An input bound to the current process tile.
///
/// Process inputs carry a read-through cache that lives as long as this
/// value.
pub enum OpenedInput {
    Raster(RasterInputTile),
    Process(InputTile),
}

impl OpenedInput {
    pub fn tile(&self) -> &Tile {
        match self {
            Self::Raster(input) => input.tile(),
            Self::Process(input) => input.tile(),
        }
    }

    /// All bands of a raster file input, or the upstream output.
    ///
    /// `validity_check` drops invalid upstream features; raster file inputs
    /// ignore it.
    pub async fn read(&self, validity_check: bool) -> Result<TileData> {
        Ok(match self {
            Self::Raster(input) => TileData::Raster(input.read(&[]).await?),
            Self::Process(input) => input.read(validity_check).await?,
        })
    }

    pub async fn is_empty(&self, validity_check: bool) -> Result<bool> {
        Ok(match self {
            Self::Raster(input) => input.is_empty(&[]).await?,
            Self::Process(input) => input.is_empty(validity_check).await?,
        })
    }
}

/// What a [`TileFunction`] sees while computing a tile.
pub struct TileContext<'a> {
    pub tile: &'a Tile,
    pub params: &'a Map<String, Value>,
    inputs: &'a BTreeMap<String, ProcessInput>,
}

impl<'a> TileContext<'a> {
    pub(crate) fn new(
        tile: &'a Tile,
        params: &'a Map<String, Value>,
        inputs: &'a BTreeMap<String, ProcessInput>,
    ) -> Self {
        Self {
            tile,
            params,
            inputs,
        }
    }

    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.inputs.keys().map(String::as_str)
    }

    /// Bind the input configured as `name` to the current tile.
    pub fn open(&self, name: &str) -> Result<OpenedInput> {
        let input = self
            .inputs
            .get(name)
            .ok_or_else(|| ProcessError::config(format!("no input named '{}'", name)))?;
        Ok(input.open(self.tile.clone()))
    }
}

//! Reading another process's output as input, through a scoped cache.

use async_trait::async_trait;
use pyramid_common::Tile;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{Result, TileData};

/// Anything that can produce the output of a process for a tile.
///
/// `tile` may belong to a different pyramid than the producer's, as long as
/// both share a grid.
#[async_trait]
pub trait RawOutputSource: Send + Sync {
    async fn get_raw_output(&self, tile: &Tile) -> Result<TileData>;
}

/// Cache keyed by the validity-check flag.
///
/// The loader runs at most once per distinct key while the cache lives;
/// concurrent callers for the same key wait for the first load.
#[derive(Debug, Default)]
pub struct ReadThroughCache {
    entries: Mutex<HashMap<bool, TileData>>,
}

impl ReadThroughCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_load<F, Fut>(&self, key: bool, load: F) -> Result<TileData>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<TileData>>,
    {
        let mut entries = self.entries.lock().await;
        if let Some(data) = entries.get(&key) {
            return Ok(data.clone());
        }
        let data = load().await?;
        entries.insert(key, data.clone());
        Ok(data)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}

/// A tile of another process's output, bound for reading.
///
/// The cache is cleared when the tile is closed or dropped, whichever comes
/// first.
pub struct InputTile {
    tile: Tile,
    source: Arc<dyn RawOutputSource>,
    cache: ReadThroughCache,
}

impl InputTile {
    pub fn new(tile: Tile, source: Arc<dyn RawOutputSource>) -> Self {
        Self {
            tile,
            source,
            cache: ReadThroughCache::new(),
        }
    }

    pub fn tile(&self) -> &Tile {
        &self.tile
    }

    /// Output of the source process for this tile.
    ///
    /// With `validity_check`, features without a geometry type or
    /// coordinates are dropped.
    pub async fn read(&self, validity_check: bool) -> Result<TileData> {
        self.cache
            .get_or_load(validity_check, move || async move {
                debug!(tile = %self.tile, validity_check, "Reading upstream process output");
                let data = self.source.get_raw_output(&self.tile).await?;
                Ok(match data {
                    TileData::Vector(features) if validity_check => {
                        TileData::Vector(features.into_iter().filter(|f| f.is_valid()).collect())
                    }
                    other => other,
                })
            })
            .await
    }

    pub async fn is_empty(&self, validity_check: bool) -> Result<bool> {
        Ok(self.read(validity_check).await?.is_empty())
    }

    /// End the read scope and release cached data.
    pub async fn close(self) {
        self.cache.clear().await;
    }

    #[cfg(test)]
    pub(crate) fn cache(&self) -> &ReadThroughCache {
        &self.cache
    }
}

impl Drop for InputTile {
    fn drop(&mut self) {
        self.cache.entries.get_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Feature, MaskedArray};
    use pyramid_common::{GridDefinition, TilePyramid};
    use serde_json::{json, Map};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
        data: TileData,
    }

    #[async_trait]
    impl RawOutputSource for CountingSource {
        async fn get_raw_output(&self, _tile: &Tile) -> Result<TileData> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.data.clone())
        }
    }

    fn tile() -> Tile {
        TilePyramid::new(GridDefinition::geodetic(), 1, 0)
            .unwrap()
            .tile(3, 1, 2)
            .unwrap()
    }

    #[tokio::test]
    async fn test_reads_once_per_flag() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            data: TileData::Raster(MaskedArray::filled(1, 2, 2, 1.0)),
        });
        let input = InputTile::new(tile(), source.clone());

        input.read(true).await.unwrap();
        input.read(true).await.unwrap();
        assert!(!input.is_empty(true).await.unwrap());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        input.read(false).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(input.cache().len().await, 2);

        input.close().await;
    }

    #[tokio::test]
    async fn test_validity_check_drops_invalid_features() {
        let features = vec![
            Feature::new(json!({"type": "Point", "coordinates": [1.0, 2.0]}), Map::new()),
            Feature::new(serde_json::Value::Null, Map::new()),
        ];
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            data: TileData::Vector(features),
        });
        let input = InputTile::new(tile(), source);

        assert_eq!(input.read(true).await.unwrap().as_features().unwrap().len(), 1);
        assert_eq!(input.read(false).await.unwrap().as_features().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_load_is_not_cached() {
        struct Failing(AtomicUsize);

        #[async_trait]
        impl RawOutputSource for Failing {
            async fn get_raw_output(&self, _tile: &Tile) -> Result<TileData> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Err(crate::FormatError::encoding("boom"))
            }
        }

        let source = Arc::new(Failing(AtomicUsize::new(0)));
        let input = InputTile::new(tile(), source.clone());
        assert!(input.read(true).await.is_err());
        assert!(input.read(true).await.is_err());
        assert_eq!(source.0.load(Ordering::SeqCst), 2);
        assert!(input.cache().is_empty().await);
    }
}

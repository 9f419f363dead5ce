//! Driver behaviour against local storage.

use formats::metadata::{prepare_output, METADATA_FILE};
use formats::{
    load_output_driver, DriverContext, Feature, MaskedArray, OutputDriver, OutputParams, TileData,
    WebOutput,
};
use pyramid_common::{GridDefinition, Tile, TilePyramid};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tempfile::TempDir;

fn output(dir: &TempDir, config: Value, metatiling: u32) -> Arc<dyn OutputDriver> {
    let Value::Object(mut map) = config else {
        panic!("config must be an object")
    };
    map.insert(
        "path".to_string(),
        Value::from(dir.path().join("out").to_string_lossy().to_string()),
    );
    let pyramid = TilePyramid::new(GridDefinition::geodetic(), metatiling, 0).unwrap();
    let params = OutputParams::from_config(map, pyramid).unwrap();
    load_output_driver(params, DriverContext::detached()).unwrap()
}

fn gradient(bands: usize, tile: &Tile) -> MaskedArray {
    let (height, width) = tile.shape();
    let mut data = Vec::with_capacity(bands * height * width);
    for band in 0..bands {
        for i in 0..height * width {
            data.push(((i + band) % 250 + 1) as f32);
        }
    }
    MaskedArray::new(bands, height, width, data, vec![false; bands * height * width]).unwrap()
}

fn count_files(dir: &std::path::Path) -> usize {
    if !dir.exists() {
        return 0;
    }
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| {
            if e.path().is_dir() {
                count_files(&e.path())
            } else {
                1
            }
        })
        .sum()
}

// ============================================================================
// PNG
// ============================================================================

#[tokio::test]
async fn test_png_round_trip_and_idempotence() {
    let dir = TempDir::new().unwrap();
    let driver = output(&dir, json!({"format": "PNG"}), 1);
    let tile = driver.pyramid().tile(5, 10, 20).unwrap();
    let data = TileData::Raster(gradient(4, &tile));

    driver.write(&tile, &data).await.unwrap();
    let first = driver.read(&tile).await.unwrap();
    assert_eq!(first, data);

    driver.write(&tile, &data).await.unwrap();
    assert_eq!(driver.read(&tile).await.unwrap(), first);
    assert!(dir.path().join("out/5/10/20.png").is_file());
}

#[tokio::test]
async fn test_png_missing_tile_reads_empty() {
    let dir = TempDir::new().unwrap();
    let driver = output(&dir, json!({"format": "PNG"}), 1);
    let tile = driver.pyramid().tile(3, 1, 1).unwrap();

    let data = driver.read(&tile).await.unwrap();
    assert_eq!(data, driver.empty(&tile));
    assert!(data.is_empty());
}

#[tokio::test]
async fn test_png_single_band_alpha() {
    let dir = TempDir::new().unwrap();
    let driver = output(&dir, json!({"format": "PNG", "nodata": 0}), 1);
    let tile = driver.pyramid().tile(4, 2, 3).unwrap();

    let mut array = gradient(1, &tile);
    array.set(0, 0, 0, 0.0, false);
    driver.write(&tile, &TileData::Raster(array)).await.unwrap();

    let read = driver.read(&tile).await.unwrap();
    let rgba = read.as_raster().unwrap();
    assert_eq!(rgba.bands, 4);
    assert_eq!(rgba.get(3, 0, 0).0, 0.0);
    assert_eq!(rgba.get(3, 0, 1).0, 255.0);
    assert_eq!(rgba.get(0, 0, 1), rgba.get(2, 0, 1));
}

#[tokio::test]
async fn test_png_masked_pixel_with_dem_nodata() {
    let dir = TempDir::new().unwrap();
    let driver = output(&dir, json!({"format": "PNG", "nodata": -9999}), 1);
    let tile = driver.pyramid().tile(4, 2, 3).unwrap();

    let mut array = gradient(1, &tile);
    array.set(0, 0, 0, 17.0, true);
    array.set(0, 0, 1, -9999.0, false);
    driver.write(&tile, &TileData::Raster(array)).await.unwrap();

    let read = driver.read(&tile).await.unwrap();
    let rgba = read.as_raster().unwrap();
    assert_eq!(rgba.get(3, 0, 0).0, 0.0);
    assert_eq!(rgba.get(3, 0, 1).0, 0.0);
    assert!(rgba.get(0, 0, 0).1);
    assert!(rgba.get(0, 0, 1).1);
    assert_eq!(rgba.get(3, 0, 2), (255.0, false));
}

#[test]
fn test_png_rejects_invalid_band_count() {
    let dir = TempDir::new().unwrap();
    for bands in [json!(0), json!(7), json!("four")] {
        let Value::Object(mut map) = json!({"format": "PNG", "bands": bands}) else {
            unreachable!()
        };
        map.insert(
            "path".to_string(),
            Value::from(dir.path().join("out").to_string_lossy().to_string()),
        );
        let pyramid = TilePyramid::new(GridDefinition::geodetic(), 1, 0).unwrap();
        let params = OutputParams::from_config(map, pyramid).unwrap();
        let err = load_output_driver(params, DriverContext::detached()).err().unwrap();
        assert!(err.is_config());
    }
}

#[tokio::test]
async fn test_png_five_bands_fail() {
    let dir = TempDir::new().unwrap();
    let driver = output(&dir, json!({"format": "PNG"}), 1);
    let tile = driver.pyramid().tile(4, 2, 3).unwrap();

    let err = driver
        .write(&tile, &TileData::Raster(gradient(5, &tile)))
        .await
        .unwrap_err();
    assert!(err.is_encoding());
    assert_eq!(count_files(&dir.path().join("out")), 0);
}

#[tokio::test]
async fn test_png_empty_data_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let driver = output(&dir, json!({"format": "PNG"}), 1);
    let tile = driver.pyramid().tile(4, 2, 3).unwrap();

    driver.write(&tile, &driver.empty(&tile)).await.unwrap();
    assert_eq!(count_files(&dir.path().join("out")), 0);
}

#[tokio::test]
async fn test_process_metatile_splits_into_output_tiles() {
    let dir = TempDir::new().unwrap();
    let driver = output(&dir, json!({"format": "PNG"}), 1);
    let process = TilePyramid::new(GridDefinition::geodetic(), 2, 0).unwrap();
    let process_tile = process.tile(4, 1, 1).unwrap();

    let data = TileData::Raster(gradient(4, &process_tile));
    driver.write(&process_tile, &data).await.unwrap();

    for (row, col) in [(2, 2), (2, 3), (3, 2), (3, 3)] {
        assert!(dir.path().join(format!("out/4/{}/{}.png", row, col)).is_file());
    }
    assert_eq!(count_files(&dir.path().join("out")), 4);
    assert!(driver.tiles_exist(&process_tile).await.unwrap());
}

#[tokio::test]
async fn test_png_for_web() {
    let dir = TempDir::new().unwrap();
    let driver = output(&dir, json!({"format": "PNG"}), 1);
    let tile = driver.pyramid().tile(2, 1, 1).unwrap();

    let web = driver.for_web(&driver.empty(&tile)).unwrap();
    assert_eq!(web.mime(), "image/png");
    let WebOutput::Image { bytes, .. } = web else {
        panic!("expected an image")
    };
    assert_eq!(&bytes[1..4], b"PNG");
}

// ============================================================================
// PNG_hillshade
// ============================================================================

#[tokio::test]
async fn test_hillshade_round_trip() {
    let dir = TempDir::new().unwrap();
    for old_band_num in [false, true] {
        let driver = output(
            &dir,
            json!({"format": "PNG_hillshade", "old_band_num": old_band_num}),
            1,
        );
        let tile = driver.pyramid().tile(6, 5, 7).unwrap();
        let (height, width) = tile.shape();

        let mut array = MaskedArray::filled(1, height, width, 100.0);
        array.set(0, 3, 3, 0.0, true);
        driver.write(&tile, &TileData::Raster(array)).await.unwrap();

        let read = driver.read(&tile).await.unwrap();
        let band = read.as_raster().unwrap();
        assert_eq!(band.bands, 1);
        assert_eq!(band.get(0, 0, 0), (100.0, false));
        assert!(band.get(0, 3, 3).1);
    }
}

// ============================================================================
// GeoJSON
// ============================================================================

fn geojson_config() -> Value {
    json!({
        "format": "GeoJSON",
        "schema": {"geometry": "Polygon", "properties": {"name": "str"}}
    })
}

fn square(x: f64, y: f64, name: &str) -> Feature {
    let mut properties = Map::new();
    properties.insert("name".to_string(), json!(name));
    properties.insert("extra".to_string(), json!(1));
    Feature::new(
        json!({
            "type": "Polygon",
            "coordinates": [[[x, y], [x + 1.0, y], [x + 1.0, y + 1.0], [x, y + 1.0], [x, y]]]
        }),
        properties,
    )
}

#[tokio::test]
async fn test_geojson_empty_write_is_noop() {
    let dir = TempDir::new().unwrap();
    let driver = output(&dir, geojson_config(), 1);
    let tile = driver.pyramid().tile(5, 10, 20).unwrap();

    driver.write(&tile, &TileData::Vector(Vec::new())).await.unwrap();
    assert_eq!(count_files(&dir.path().join("out")), 0);
    assert_eq!(driver.read(&tile).await.unwrap(), TileData::Vector(Vec::new()));
}

#[tokio::test]
async fn test_geojson_round_trip_with_schema() {
    let dir = TempDir::new().unwrap();
    let driver = output(&dir, geojson_config(), 1);
    // covers lon -67.5..-61.875, lat 28.125..33.75
    let tile = driver.pyramid().tile(5, 10, 20).unwrap();

    let point = Feature::new(json!({"type": "Point", "coordinates": [-65.0, 30.0]}), Map::new());
    let features = vec![square(-66.0, 30.0, "inside"), point, square(10.0, 10.0, "far away")];
    driver.write(&tile, &TileData::Vector(features)).await.unwrap();

    let read = driver.read(&tile).await.unwrap();
    let features = read.as_features().unwrap();
    assert_eq!(features.len(), 1);
    assert_eq!(features[0].properties.get("name"), Some(&json!("inside")));
    assert!(!features[0].properties.contains_key("extra"));

    let web = driver.for_web(&read).unwrap();
    assert_eq!(web.mime(), "application/json");
    assert!(matches!(web, WebOutput::Features(ref f) if f.len() == 1));
}

// ============================================================================
// Output metadata
// ============================================================================

#[tokio::test]
async fn test_metadata_established_once_then_verified() {
    let dir = TempDir::new().unwrap();
    let first = output(&dir, json!({"format": "PNG"}), 1);
    prepare_output(first.as_ref(), false).await.unwrap();

    let file = dir.path().join("out").join(METADATA_FILE);
    let written = std::fs::read(&file).unwrap();

    let same = output(&dir, json!({"format": "PNG"}), 1);
    prepare_output(same.as_ref(), false).await.unwrap();
    assert_eq!(std::fs::read(&file).unwrap(), written);

    let other_metatiling = output(&dir, json!({"format": "PNG"}), 2);
    let err = prepare_output(other_metatiling.as_ref(), false).await.unwrap_err();
    assert!(err.is_conflict());

    let other_format = output(&dir, json!({"format": "PNG_hillshade"}), 1);
    let err = prepare_output(other_format.as_ref(), true).await.unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(std::fs::read(&file).unwrap(), written);
}

#[tokio::test]
async fn test_readonly_does_not_establish() {
    let dir = TempDir::new().unwrap();
    let driver = output(&dir, json!({"format": "PNG"}), 1);
    prepare_output(driver.as_ref(), true).await.unwrap();
    assert!(!dir.path().join("out").join(METADATA_FILE).exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_conflicting_establishers() {
    for _ in 0..50 {
        let dir = TempDir::new().unwrap();
        let handles: Vec<_> = [1, 2]
            .into_iter()
            .map(|metatiling| {
                let driver = output(&dir, json!({"format": "PNG"}), metatiling);
                tokio::spawn(async move {
                    prepare_output(driver.as_ref(), false).await.map(|m| m.pyramid.metatiling)
                })
            })
            .collect();

        let mut established = Vec::new();
        for handle in handles {
            match handle.await.unwrap() {
                Ok(metatiling) => established.push(metatiling),
                Err(e) => assert!(e.is_conflict()),
            }
        }
        assert_eq!(established.len(), 1);

        let file = dir.path().join("out").join(METADATA_FILE);
        let stored: Value = serde_json::from_slice(&std::fs::read(file).unwrap()).unwrap();
        assert_eq!(stored["pyramid"]["metatiling"], json!(established[0]));
    }
}

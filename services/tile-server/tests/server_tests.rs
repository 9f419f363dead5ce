use async_trait::async_trait;
use axum::body::{self, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use formats::{Feature, MaskedArray, TileData};
use process::{ProcessError, RunMode, TileContext, TileFunction};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use storage::ObjectStorageConfig;
use tempfile::TempDir;
use tile_server::{router, AppState};
use tower::util::ServiceExt;

struct Fill;

#[async_trait]
impl TileFunction for Fill {
    async fn run(&self, ctx: &TileContext<'_>) -> process::Result<TileData> {
        let (height, width) = ctx.tile.shape();
        Ok(TileData::Raster(MaskedArray::filled(3, height, width, 128.0)))
    }
}

struct Fail;

#[async_trait]
impl TileFunction for Fail {
    async fn run(&self, _ctx: &TileContext<'_>) -> process::Result<TileData> {
        Err(ProcessError::function("elevation model unavailable"))
    }
}

/// One point in the middle of every tile.
struct Centroids;

#[async_trait]
impl TileFunction for Centroids {
    async fn run(&self, ctx: &TileContext<'_>) -> process::Result<TileData> {
        let bounds = ctx.tile.bounds();
        let mut properties = Map::new();
        properties.insert("zoom".to_string(), json!(ctx.tile.zoom()));
        let point = json!({
            "type": "Point",
            "coordinates": [
                (bounds.min_x + bounds.max_x) / 2.0,
                (bounds.min_y + bounds.max_y) / 2.0
            ]
        });
        Ok(TileData::Vector(vec![Feature::new(point, properties)]))
    }
}

fn write_process(dir: &TempDir, name: &str, output: &str) -> PathBuf {
    let path = dir.path().join(format!("{}.yaml", name));
    std::fs::write(
        &path,
        format!(
            "zoom_levels: [0, 10]\npyramid:\n  grid: geodetic\n  metatiling: 2\noutput:\n{}",
            output
        ),
    )
    .unwrap();
    path
}

async fn app(dir: &TempDir, debug: bool) -> Router {
    let files = vec![
        write_process(dir, "shade", "  format: PNG\n  path: shade\n"),
        write_process(dir, "broken", "  format: PNG\n  path: broken\n"),
        write_process(
            dir,
            "points",
            "  format: GeoJSON\n  path: points\n  schema:\n    geometry: Point\n    properties:\n      zoom: int\n",
        ),
    ];
    let mut functions: HashMap<String, Arc<dyn TileFunction>> = HashMap::new();
    functions.insert("shade".to_string(), Arc::new(Fill));
    functions.insert("broken".to_string(), Arc::new(Fail));
    functions.insert("points".to_string(), Arc::new(Centroids));

    let state = AppState::load(&files, RunMode::Continue, &functions, ObjectStorageConfig::default(), debug)
        .await
        .unwrap();
    router(Arc::new(state))
}

async fn get(app: Router, uri: &str) -> (StatusCode, Option<String>, Option<String>, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let header_value = |name: header::HeaderName| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let content_type = header_value(header::CONTENT_TYPE);
    let cache_control = header_value(header::CACHE_CONTROL);
    let body = body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, content_type, cache_control, body.to_vec())
}

#[tokio::test]
async fn test_png_tile() {
    let dir = TempDir::new().unwrap();
    let (status, content_type, cache_control, body) =
        get(app(&dir, false).await, "/wmts_simple/1.0.0/shade/default/WGS84/7/3/5.png").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("image/png"));
    assert_eq!(cache_control.as_deref(), Some("no-store"));
    assert_eq!(&body[1..4], b"PNG");
    // web tile (7, 3, 5) lies in process metatile (7, 1, 2)
    assert!(dir.path().join("shade/7/1/2.png").is_file());
}

#[tokio::test]
async fn test_geojson_tile() {
    let dir = TempDir::new().unwrap();
    let (status, content_type, _, body) =
        get(app(&dir, false).await, "/wmts_simple/1.0.0/points/default/WGS84/4/2/2.geojson").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("application/json"));
    let features: Value = serde_json::from_slice(&body).unwrap();
    assert!(features.is_array());
}

#[tokio::test]
async fn test_failure_is_500() {
    let dir = TempDir::new().unwrap();
    let (status, _, _, body) =
        get(app(&dir, false).await, "/wmts_simple/1.0.0/broken/default/WGS84/3/1/1.png").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!String::from_utf8_lossy(&body).contains("elevation model"));
}

#[tokio::test]
async fn test_failure_details_in_debug_mode() {
    let dir = TempDir::new().unwrap();
    let (status, _, _, body) =
        get(app(&dir, true).await, "/wmts_simple/1.0.0/broken/default/WGS84/3/1/1.png").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(String::from_utf8_lossy(&body).contains("elevation model unavailable"));
}

#[tokio::test]
async fn test_unknown_process_and_bad_tiles() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir, false).await;

    let (status, ..) = get(app.clone(), "/wmts_simple/1.0.0/missing/default/WGS84/1/0/0.png").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, ..) = get(app.clone(), "/wmts_simple/1.0.0/shade/default/g/1/0/0.png").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, ..) = get(app.clone(), "/wmts_simple/1.0.0/shade/default/WGS84/1/0/99.png").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, ..) = get(app.clone(), "/wmts_simple/1.0.0/shade/default/WGS84/1/0/x.png").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, ..) = get(app, "/wmts_simple/1.0.0/shade/default/WGS84/1/0/0.jpg").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_index_escapes_process_names() {
    let dir = TempDir::new().unwrap();
    let files = vec![write_process(&dir, "a<b>&c", "  format: PNG\n  path: odd\n")];
    let state = AppState::load(&files, RunMode::Readonly, &HashMap::new(), ObjectStorageConfig::default(), false)
        .await
        .unwrap();

    let (status, _, _, body) = get(router(Arc::new(state)), "/").await;
    assert_eq!(status, StatusCode::OK);
    let page = String::from_utf8(body).unwrap();
    assert!(page.contains("a&lt;b&gt;&amp;c"));
    assert!(!page.contains("a<b>"));
}

#[tokio::test]
async fn test_index_and_health() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir, false).await;

    let (status, _, _, body) = get(app.clone(), "/").await;
    assert_eq!(status, StatusCode::OK);
    let page = String::from_utf8(body).unwrap();
    for name in ["shade", "broken", "points"] {
        assert!(page.contains(name));
    }
    assert!(page.contains("EPSG:4326"));
    assert!(page.contains("/wmts_simple/1.0.0/shade/default/WGS84/"));

    let (status, _, _, body) = get(app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"ok");
}

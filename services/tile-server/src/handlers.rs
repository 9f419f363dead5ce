//! HTTP handlers.

use axum::extract::{Extension, Path};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use formats::WebOutput;
use std::fmt::Write;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, instrument};

use crate::error::ServeError;
use crate::metrics::{record_tile_duration, record_tile_failure, record_tile_request};
use crate::state::AppState;

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// GET / - configured processes and their tile URLs
pub async fn index_handler(Extension(state): Extension<Arc<AppState>>) -> Html<String> {
    let mut page = String::from("<html>\n<head><title>Processes</title></head>\n<body>\n<h1>Processes</h1>\n<ul>\n");
    for (name, served) in &state.processes {
        let name = escape_html(name);
        let bounds = served.process.bounds();
        let _ = writeln!(
            page,
            "<li><b>{}</b> EPSG:{} bounds [{}, {}, {}, {}] <code>/wmts_simple/1.0.0/{}/default/{}/{{zoom}}/{{row}}/{{col}}.{}</code></li>",
            name,
            served.web_pyramid.crs().epsg(),
            bounds.min_x,
            bounds.min_y,
            bounds.max_x,
            bounds.max_y,
            name,
            served.grid_label(),
            served.file_extension().trim_start_matches('.'),
        );
    }
    page.push_str("</ul>\n</body>\n</html>\n");
    Html(page)
}

/// Column from `<col>.<ext>`; `ext` must be the driver's file extension.
fn parse_tile_file(tile_file: &str, extension: &str) -> Result<u32, ServeError> {
    let (col, ext) = tile_file
        .split_once('.')
        .ok_or_else(|| ServeError::BadRequest(format!("missing extension in '{}'", tile_file)))?;
    let expected = extension.trim_start_matches('.');
    if ext != expected {
        return Err(ServeError::BadRequest(format!(
            "extension '{}' does not match output format '{}'",
            ext, expected
        )));
    }
    col.parse()
        .map_err(|_| ServeError::BadRequest(format!("invalid column '{}'", col)))
}

/// GET /wmts_simple/1.0.0/:mp_name/default/:grid/:zoom/:row/:col.:ext
#[instrument(skip(state))]
pub async fn wmts_tile_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((mp_name, grid, zoom, row, tile_file)): Path<(String, String, u32, u32, String)>,
) -> Result<Response, ServeError> {
    let served = state
        .processes
        .get(&mp_name)
        .ok_or_else(|| ServeError::UnknownProcess(mp_name.clone()))?;
    if grid != served.grid_label() {
        return Err(ServeError::BadRequest(format!(
            "process '{}' is served on grid '{}', not '{}'",
            mp_name,
            served.grid_label(),
            grid
        )));
    }
    let col = parse_tile_file(&tile_file, served.file_extension())?;
    let tile = served
        .web_pyramid
        .tile(zoom, row, col)
        .map_err(|e| ServeError::BadRequest(e.to_string()))?;

    record_tile_request(&mp_name);
    let start = Instant::now();
    let result = async {
        let data = served.process.get_raw_output(&tile).await?;
        Ok::<_, process::ProcessError>(served.process.output().for_web(&data)?)
    }
    .await;
    record_tile_duration(&mp_name, start.elapsed());

    let web = match result {
        Ok(web) => web,
        Err(e) => {
            error!(process = %mp_name, tile = %tile, error = %e, "Tile request failed");
            record_tile_failure(&mp_name);
            return Err(ServeError::Tile {
                process: mp_name,
                tile: tile.to_string(),
                source: e,
                debug: state.debug,
            });
        }
    };

    debug!(process = %mp_name, tile = %tile, mime = web.mime(), "Serving tile");
    Ok(match web {
        WebOutput::Image { bytes, mime } => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, mime)
            .header(header::CACHE_CONTROL, "no-store")
            .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
            .body(bytes.into())
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        WebOutput::Features(features) => Json(features).into_response(),
    })
}

/// GET /health
pub async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// GET /metrics - Prometheus exposition
pub async fn metrics_handler(Extension(state): Extension<Arc<AppState>>) -> Response {
    match &state.prometheus {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

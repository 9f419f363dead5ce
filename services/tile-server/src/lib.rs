//! Web tile server for processes.
//!
//! Tiles are requested on the process grid at metatiling 1 and produced
//! through [`process::Process::get_raw_output`], so a request may read
//! stored output or compute it depending on the run mode.

pub mod error;
pub mod handlers;
pub mod metrics;
pub mod state;

use axum::{extract::Extension, routing::get, Router};
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

pub use error::ServeError;
pub use state::{AppState, ServedProcess};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::index_handler))
        .route(
            "/wmts_simple/1.0.0/:mp_name/default/:grid/:zoom/:row/:tile_file",
            get(handlers::wmts_tile_handler),
        )
        .route("/health", get(handlers::health_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
}

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Request failures and their HTTP status.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("Unknown process '{0}'")]
    UnknownProcess(String),

    #[error("Bad tile request: {0}")]
    BadRequest(String),

    /// Failure while producing a tile. The chain is only shown in debug mode.
    #[error("Tile {tile} of process '{process}' failed: {source}")]
    Tile {
        process: String,
        tile: String,
        #[source]
        source: process::ProcessError,
        debug: bool,
    },
}

impl ServeError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnknownProcess(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Tile { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(&format!("\ncaused by: {}", cause));
        source = cause.source();
    }
    message
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        let body = match &self {
            Self::Tile { debug: false, .. } => "Internal Server Error".to_string(),
            other => error_chain(other),
        };
        (
            self.status(),
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            body,
        )
            .into_response()
    }
}

//! Router and the non-streaming endpoints.

use crate::state::AppState;
use crate::stream::stream_handler;
use axum::{
    extract::State,
    http::{
        header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE, VARY},
        HeaderMap, StatusCode, Uri,
    },
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use flate2::{write::GzEncoder, Compression};
use serde_json::json;
use std::io::Write;
use tower_http::trace::TraceLayer;
use tracing::warn;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/stream", get(stream_handler))
        .route("/api/health", get(health))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Current snapshot as JSON, gzip-compressed when the client accepts it.
async fn health(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let frame = match state.current_frame().await {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "failed to serialize snapshot for /api/health");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    };

    if accepts_gzip(&headers) {
        match gzip(frame.as_bytes()) {
            Ok(body) => {
                return (
                    [
                        (CONTENT_TYPE, "application/json"),
                        (CONTENT_ENCODING, "gzip"),
                        (VARY, "accept-encoding"),
                    ],
                    body,
                )
                    .into_response();
            }
            Err(e) => warn!(error = %e, "gzip failed; sending identity"),
        }
    }
    (
        [(CONTENT_TYPE, "application/json"), (VARY, "accept-encoding")],
        frame.to_string(),
    )
        .into_response()
}

async fn not_found(uri: Uri) -> Response {
    let path = uri.path();
    if path == "/api" || path.starts_with("/api/") {
        (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" }))).into_response()
    } else {
        (StatusCode::NOT_FOUND, "Not found").into_response()
    }
}

fn accepts_gzip(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|coding| {
            let mut parts = coding.split(';').map(str::trim);
            let name = parts.next().unwrap_or_default();
            let refused = parts.any(|p| matches!(p, "q=0" | "q=0.0" | "q=0.00" | "q=0.000"));
            name.eq_ignore_ascii_case("gzip") && !refused
        })
}

fn gzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut enc = GzEncoder::new(Vec::with_capacity(bytes.len() / 4), Compression::fast());
    enc.write_all(bytes)?;
    enc.finish()
}

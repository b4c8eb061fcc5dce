//! HTTP API for StreamRelay
//!
//! - `POST /api/streams/start` - Start (or restart) a stream
//! - `POST /api/streams/stop` - Stop a stream
//! - `GET /api/streams/status` - Running/stopped for a stream key
//! - `GET /api/streams` - All registered sessions
//! - `GET /hls/:stream_key/*file` - Playlist and segment files
//! - `/api/overlays` - Overlay CRUD
//! - `GET /health` - Liveness probe

pub mod hls;
pub mod overlays;
pub mod streams;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use streamrelay_core::Supervisor;

use crate::config::Config;
use crate::overlays::{OverlayError, OverlayStore};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Session supervisor
    pub supervisor: Supervisor,
    /// Overlay document store
    pub overlays: Arc<OverlayStore>,
    /// Service configuration
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(supervisor: Supervisor, overlays: Arc<OverlayStore>, config: Arc<Config>) -> Self {
        Self {
            supervisor,
            overlays,
            config,
        }
    }
}

/// Build the HTTP API router
pub fn build_router(state: AppState) -> Router {
    // The player and overlay editor are served from other origins
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        // Stream endpoints
        .route("/api/streams", get(streams::list_streams))
        .route("/api/streams/start", post(streams::start_stream))
        .route("/api/streams/stop", post(streams::stop_stream))
        .route("/api/streams/status", get(streams::stream_status))
        // HLS output
        .route("/hls/:stream_key/*file", get(hls::serve_file))
        // Overlay endpoints
        .route(
            "/api/overlays",
            get(overlays::list_overlays).post(overlays::create_overlay),
        )
        .route(
            "/api/overlays/:id",
            get(overlays::get_overlay)
                .put(overlays::update_overlay)
                .delete(overlays::delete_overlay),
        )
        // Health
        .route("/health", get(health_check))
        // Middleware
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": "streamrelay RTSP → HLS backend running" }))
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Handler error carrying its HTTP status
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<streamrelay_core::Error> for ApiError {
    fn from(e: streamrelay_core::Error) -> Self {
        use streamrelay_core::Error;

        let status = match &e {
            e if e.is_invalid_input() => StatusCode::BAD_REQUEST,
            Error::EngineNotFound { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("Stream operation failed: {}", e);
        }
        Self::new(status, e.to_string())
    }
}

impl From<OverlayError> for ApiError {
    fn from(e: OverlayError) -> Self {
        match e {
            OverlayError::NotFound(_) => Self::not_found("Overlay not found"),
            OverlayError::InvalidDocument => Self::bad_request(e.to_string()),
            other => {
                tracing::error!("Overlay store failure: {}", other);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_status_mapping() {
        let e: ApiError = streamrelay_core::Error::EmptySourceUrl.into();
        assert_eq!(e.status, StatusCode::BAD_REQUEST);

        let e: ApiError = streamrelay_core::Error::EngineNotFound {
            engine: "ffmpeg".to_string(),
        }
        .into();
        assert_eq!(e.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(e.message.contains("ffmpeg"));
    }

    #[test]
    fn test_overlay_error_status_mapping() {
        let e: ApiError = OverlayError::NotFound("abc".to_string()).into();
        assert_eq!(e.status, StatusCode::NOT_FOUND);

        let e: ApiError = OverlayError::InvalidDocument.into();
        assert_eq!(e.status, StatusCode::BAD_REQUEST);
    }
}

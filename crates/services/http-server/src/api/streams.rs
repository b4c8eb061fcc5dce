//! Stream control endpoints
//!
//! Start, stop and query RTSP→HLS sessions by stream key.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use streamrelay_core::{SessionInfo, SessionStatus, StartOptions};

use super::hls::is_safe_name;
use super::{ApiError, AppState};

/// URL prefix the HLS output is served under
pub const HLS_ROUTE_PREFIX: &str = "/hls";

/// Request body for starting a stream
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartStreamRequest {
    /// Source URL (usually `rtsp://...`)
    #[serde(default)]
    pub rtsp_url: Option<String>,

    /// Stream key; also the output subdirectory name
    #[serde(default = "default_stream_key")]
    pub stream_key: String,

    /// Segment duration in seconds
    #[serde(default)]
    pub segment_time: Option<u32>,

    /// Keep the audio track
    #[serde(default)]
    pub with_audio: bool,
}

/// Request body for stopping a stream
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopStreamRequest {
    #[serde(default = "default_stream_key")]
    pub stream_key: String,
}

/// Query parameters for the status endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    #[serde(default = "default_stream_key")]
    pub stream_key: String,
}

fn default_stream_key() -> String {
    "default".to_string()
}

/// Response body for a started stream
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartStreamResponse {
    /// Playlist URL relative to this server
    pub hls_path: String,
    pub status: SessionStatus,
}

/// Response body carrying only a status
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: SessionStatus,
}

/// Start (or restart) a stream
///
/// POST /api/streams/start
pub async fn start_stream(
    State(state): State<AppState>,
    Json(req): Json<StartStreamRequest>,
) -> Result<Json<StartStreamResponse>, ApiError> {
    let source_url = match req.rtsp_url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => url.to_string(),
        _ => return Err(ApiError::bad_request("rtspUrl is required")),
    };
    if !is_safe_name(&req.stream_key) {
        return Err(ApiError::bad_request("Invalid streamKey"));
    }

    let options = StartOptions {
        segment_duration_secs: req
            .segment_time
            .filter(|secs| *secs > 0)
            .unwrap_or(state.config.streams.default_segment_seconds),
        with_audio: req.with_audio,
    };

    let playlist = state
        .supervisor
        .start(&req.stream_key, &source_url, options)
        .await?;

    Ok(Json(StartStreamResponse {
        hls_path: format!("{}/{}", HLS_ROUTE_PREFIX, playlist),
        status: state.supervisor.status(&req.stream_key).await,
    }))
}

/// Stop a stream
///
/// POST /api/streams/stop
pub async fn stop_stream(
    State(state): State<AppState>,
    Json(req): Json<StopStreamRequest>,
) -> Json<StatusResponse> {
    state.supervisor.stop(&req.stream_key).await;
    Json(StatusResponse {
        status: state.supervisor.status(&req.stream_key).await,
    })
}

/// Report whether a stream's process is alive
///
/// GET /api/streams/status?streamKey=...
pub async fn stream_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: state.supervisor.status(&query.stream_key).await,
    })
}

/// List every registered session
///
/// GET /api/streams
pub async fn list_streams(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    Json(state.supervisor.sessions().await)
}

//! HLS file serving
//!
//! Serves playlists and segments straight from the stream's output
//! directory. Playlists are rewritten by the engine every segment, so they
//! are never cached.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use std::path::{Component, Path as FsPath};

use super::{ApiError, AppState};

const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
const SEGMENT_CONTENT_TYPE: &str = "video/mp2t";
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Serve a file from a stream's HLS output
///
/// GET /hls/:stream_key/*file
pub async fn serve_file(
    State(state): State<AppState>,
    Path((stream_key, file)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let file = file.strip_prefix('/').unwrap_or(&file);
    if !is_safe_name(&stream_key) || !is_safe_relative(file) {
        return Err(ApiError::bad_request("Invalid path"));
    }

    let path = state.supervisor.output_dir(&stream_key).join(file);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(path = %path.display(), "HLS read failed: {}", e);
            }
            return Err(ApiError::not_found(format!("Not found: {}/{}", stream_key, file)));
        }
    };

    let content_type = content_type_for(file);
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type);
    if content_type == PLAYLIST_CONTENT_TYPE {
        builder = builder.header(header::CACHE_CONTROL, "no-cache");
    }

    Ok(builder
        .body(Body::from(bytes))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()))
}

/// Content type by file extension
pub fn content_type_for(file: &str) -> &'static str {
    match FsPath::new(file).extension().and_then(|ext| ext.to_str()) {
        Some("m3u8") => PLAYLIST_CONTENT_TYPE,
        Some("ts") => SEGMENT_CONTENT_TYPE,
        _ => FALLBACK_CONTENT_TYPE,
    }
}

/// A single plain path component: no separators, no `.`/`..`
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\']) && name != "." && name != ".."
}

/// A relative path made only of plain components
pub fn is_safe_relative(path: &str) -> bool {
    !path.is_empty()
        && !path.contains('\\')
        && FsPath::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

//! Overlay CRUD endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ApiError, AppState};
use crate::overlays::Document;

/// Query parameters for listing overlays
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Create an overlay
///
/// POST /api/overlays
pub async fn create_overlay(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Document>), ApiError> {
    let doc = state.overlays.insert(body).await?;
    Ok((StatusCode::CREATED, Json(doc)))
}

/// List overlays, newest first
///
/// GET /api/overlays?userId=...
pub async fn list_overlays(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<Document>> {
    Json(state.overlays.list(query.user_id.as_deref()).await)
}

/// GET /api/overlays/:id
pub async fn get_overlay(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Document>, ApiError> {
    state
        .overlays
        .get(&id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Overlay not found"))
}

/// Merge fields into an overlay
///
/// PUT /api/overlays/:id
pub async fn update_overlay(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Document>, ApiError> {
    Ok(Json(state.overlays.update(&id, body).await?))
}

/// DELETE /api/overlays/:id
pub async fn delete_overlay(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.overlays.delete(&id).await?;
    Ok(Json(json!({ "deleted": true })))
}

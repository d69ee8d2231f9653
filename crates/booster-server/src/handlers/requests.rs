//! Poll and stream handlers for admitted requests.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    error::ServerError, models::RequestStatusResponse, state::AppState, streaming,
};

/// Handle `GET /v1/requests/{id}`: point-in-time status with partial or
/// final text.
pub async fn handle_poll(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RequestStatusResponse>, ServerError> {
    let snap = state
        .scheduler
        .snapshot(id)
        .ok_or(ServerError::UnknownRequest(id))?;
    Ok(Json(snap.into()))
}

/// Handle `GET /v1/requests/{id}/stream`: SSE delivery of tokens as they
/// are produced.
pub async fn handle_stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServerError> {
    let (snap, rx) = state
        .scheduler
        .subscribe(id)
        .ok_or(ServerError::UnknownRequest(id))?;
    Ok(streaming::stream_request(Arc::clone(&state.scheduler), snap, rx))
}

//! Submit-generation handler.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use std::time::Duration;

use crate::{
    error::ServerError,
    models::{GenerateAccepted, GenerateRequest},
    state::AppState,
};

/// Handle `POST /v1/generate`.
///
/// Admission is synchronous: either the request is queued and its ID
/// returned, or a structured rejection comes back immediately. The gateway
/// never blocks waiting on an invalid pod.
pub async fn handle_generate(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Result<impl IntoResponse, ServerError> {
    let deadline = req.deadline_secs.map(Duration::from_secs);
    let id = state
        .scheduler
        .submit(&req.pod, &req.prompt, req.system.as_deref(), deadline)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(GenerateAccepted {
            id,
            status: "queued".to_string(),
        }),
    ))
}

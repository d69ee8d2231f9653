//! Submit-generation request/response types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body of `POST /v1/generate`.
#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    /// Pod to run against.
    pub pod: String,
    /// User text for the `{USER}` placeholder.
    pub prompt: String,
    /// Optional replacement for the template's base system prompt.
    pub system: Option<String>,
    /// Optional per-request deadline override, seconds.
    pub deadline_secs: Option<u64>,
}

/// Accepted response: the request is queued; poll or stream it by ID.
#[derive(Debug, Serialize)]
pub struct GenerateAccepted {
    pub id: Uuid,
    pub status: String,
}

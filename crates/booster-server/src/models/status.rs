//! Poll response type.

use booster_pod::RequestSnapshot;
use serde::Serialize;
use uuid::Uuid;

/// Body of `GET /v1/requests/{id}`.
#[derive(Debug, Serialize)]
pub struct RequestStatusResponse {
    pub id: Uuid,
    pub pod: String,
    pub status: String,
    /// Partial text while running, final text afterwards.
    pub text: String,
    pub prompt_tokens: usize,
    pub generated_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Admission time, unix seconds.
    pub created: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttft_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_per_sec: Option<f64>,
}

impl From<RequestSnapshot> for RequestStatusResponse {
    fn from(snap: RequestSnapshot) -> Self {
        Self {
            id: snap.id,
            pod: snap.pod,
            status: snap.phase.as_str().to_string(),
            text: snap.text,
            prompt_tokens: snap.prompt_tokens,
            generated_tokens: snap.generated_tokens,
            finish_reason: snap.finish_reason,
            error: snap.error,
            created: snap.created_at.timestamp(),
            ttft_ms: snap.ttft_ms,
            tokens_per_sec: snap.tokens_per_sec,
        }
    }
}

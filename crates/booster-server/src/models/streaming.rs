//! Server-Sent Events (SSE) streaming types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One token-batch chunk on the stream.
#[derive(Debug, Serialize, Deserialize)]
pub struct StreamChunk {
    pub id: Uuid,
    pub text: String,
}

/// Final stream event before the `[DONE]` sentinel.
#[derive(Debug, Serialize, Deserialize)]
pub struct StreamEnd {
    pub id: Uuid,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

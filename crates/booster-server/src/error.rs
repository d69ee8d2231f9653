//! HTTP error handling and response mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use booster_pod::AdmissionError;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error("unknown request {0}")]
    UnknownRequest(Uuid),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let (status, error_type) = match &self {
            ServerError::Admission(err) => match err {
                AdmissionError::UnknownPod(_) => (StatusCode::NOT_FOUND, "invalid_request_error"),
                AdmissionError::InvalidBudget { .. }
                | AdmissionError::Template(_)
                | AdmissionError::Tokenization(_)
                | AdmissionError::ContextOverflow { .. } => {
                    (StatusCode::BAD_REQUEST, "invalid_request_error")
                }
                AdmissionError::ModelUnavailable { .. } | AdmissionError::ShuttingDown => {
                    (StatusCode::SERVICE_UNAVAILABLE, "server_error")
                }
            },
            ServerError::UnknownRequest(_) => (StatusCode::NOT_FOUND, "invalid_request_error"),
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": error_type,
            }
        }));

        (status, body).into_response()
    }
}

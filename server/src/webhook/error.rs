//! Webhook Error Types

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Missing signature header")]
    MissingSignature,

    #[error("Signature does not match body")]
    InvalidSignature,

    #[error("Malformed callback body: {0}")]
    InvalidBody(#[from] serde_json::Error),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> axum::response::Response {
        let (code, message) = match &self {
            Self::MissingSignature => ("missing_signature", "Signature header is required"),
            Self::InvalidSignature => ("invalid_signature", "Invalid signature"),
            Self::InvalidBody(err) => {
                tracing::warn!("Rejected callback body: {}", err);
                ("invalid_body", "Malformed callback body")
            }
        };

        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": code, "message": message })),
        )
            .into_response()
    }
}

//! Webhook Handlers

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use tracing::{debug, error, warn};

use super::error::WebhookError;
use super::events::CallbackBody;
use super::signing::{verify_signature, SIGNATURE_HEADER};
use crate::api::AppState;
use crate::bridge::Admission;

/// POST /callback
///
/// Verifies the platform signature, hands every text message to the bridge
/// and acknowledges immediately. Answers are pushed later.
pub async fn callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<&'static str, WebhookError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(WebhookError::MissingSignature)?;

    if !verify_signature(&state.config.line_channel_secret, &body, signature) {
        warn!("Invalid callback signature; check the channel secret");
        return Err(WebhookError::InvalidSignature);
    }

    let payload: CallbackBody = serde_json::from_slice(&body)?;
    for incoming in payload.into_texts() {
        match state.bridge.handle_incoming(&incoming.user_id, &incoming.text) {
            Ok(Admission::Accepted(request_id)) => {
                debug!(user_id = %incoming.user_id, request_id = %request_id, "Message accepted");
            }
            Ok(Admission::Busy | Admission::Ignored) => {}
            Err(e) => error!(user_id = %incoming.user_id, error = %e, "Message not registered"),
        }
    }

    Ok("OK")
}

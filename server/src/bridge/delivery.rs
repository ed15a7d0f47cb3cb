//! Push Delivery
//!
//! Out-of-band message send used once a query has an answer. The webhook
//! request that carried the question has long been acknowledged by then.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// Maximum characters the messaging platform accepts in one text message.
pub const MAX_MESSAGE_CHARS: usize = 5000;

/// Push delivery failure.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    #[error("Push request failed: {0}")]
    Transport(String),
    #[error("Push rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Push-message collaborator.
#[async_trait]
pub trait ResponseDelivery: Send + Sync + 'static {
    async fn push(&self, user_id: &str, message: &str) -> Result<(), DeliveryError>;
}

/// Push client for the messaging platform's push API.
#[derive(Clone)]
pub struct LinePushClient {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

#[derive(Serialize)]
struct PushBody<'a> {
    to: &'a str,
    messages: [TextMessage<'a>; 1],
}

#[derive(Serialize)]
struct TextMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: &'a str,
}

impl LinePushClient {
    pub fn new(
        base_url: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| DeliveryError::Transport(format!("Client build error: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        })
    }
}

#[async_trait]
impl ResponseDelivery for LinePushClient {
    async fn push(&self, user_id: &str, message: &str) -> Result<(), DeliveryError> {
        let text = truncate_message(message);
        let body = PushBody {
            to: user_id,
            messages: [TextMessage {
                kind: "text",
                text: &text,
            }],
        };

        let resp = self
            .client
            .post(format!("{}/v2/bot/message/push", self.base_url))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body: String = resp
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(200)
                .collect();
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!(user_id = %user_id, chars = text.chars().count(), "Push delivered");
        Ok(())
    }
}

/// Clip a message to the platform limit, marking the cut with an ellipsis.
pub fn truncate_message(message: &str) -> String {
    if message.chars().count() <= MAX_MESSAGE_CHARS {
        return message.to_string();
    }
    let mut clipped: String = message.chars().take(MAX_MESSAGE_CHARS - 1).collect();
    clipped.push('…');
    clipped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_message_untouched() {
        assert_eq!(truncate_message("20mg twice daily"), "20mg twice daily");
    }

    #[test]
    fn test_long_message_clipped_to_limit() {
        let long = "藥".repeat(MAX_MESSAGE_CHARS + 10);
        let clipped = truncate_message(&long);
        assert_eq!(clipped.chars().count(), MAX_MESSAGE_CHARS);
        assert!(clipped.ends_with('…'));
    }

    #[test]
    fn test_push_body_shape() {
        let body = PushBody {
            to: "u1",
            messages: [TextMessage {
                kind: "text",
                text: "hello",
            }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"to": "u1", "messages": [{"type": "text", "text": "hello"}]})
        );
    }
}

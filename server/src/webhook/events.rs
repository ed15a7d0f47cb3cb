//! Callback Payload Types
//!
//! Only the fields the bridge reads are modelled; everything else in the
//! platform's event objects is ignored.

use serde::Deserialize;

/// Body of a webhook callback.
#[derive(Debug, Deserialize)]
pub struct CallbackBody {
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub events: Vec<WebhookEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub source: Option<EventSource>,
    #[serde(default)]
    pub message: Option<EventMessage>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSource {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EventMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

/// A text message from an identifiable user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingText {
    pub user_id: String,
    pub text: String,
}

impl WebhookEvent {
    /// The user's text, if this is a text message event with a known sender.
    pub fn into_text(self) -> Option<IncomingText> {
        if self.kind != "message" {
            return None;
        }
        let message = self.message.filter(|m| m.kind == "text")?;
        let user_id = self.source?.user_id?;
        Some(IncomingText {
            user_id,
            text: message.text?,
        })
    }
}

impl CallbackBody {
    /// Text messages in delivery order.
    pub fn into_texts(self) -> Vec<IncomingText> {
        self.events.into_iter().filter_map(WebhookEvent::into_text).collect()
    }
}

//! Messaging Platform Webhook
//!
//! Signed callback intake. Each verified text message becomes one bridge
//! submission.

pub mod error;
pub mod events;
pub mod handlers;
pub mod signing;

pub use error::WebhookError;
pub use events::{CallbackBody, IncomingText};
pub use signing::{sign_body, verify_signature, SIGNATURE_HEADER};

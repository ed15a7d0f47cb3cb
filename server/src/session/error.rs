//! Session Manager Errors

use std::time::Duration;

use thiserror::Error;

use crate::backend::BackendError;

/// Errors surfaced by the session manager.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No live session could be obtained within the acquire bound.
    #[error("Backend session unavailable: {0}")]
    Unavailable(String),

    /// A reconnect attempt was refused because the previous one failed recently.
    #[error("Reconnect backing off for {}s", retry_in.as_secs())]
    BackoffActive { retry_in: Duration },

    /// Authentication against the backend failed.
    #[error("Reconnect failed: {0}")]
    Reconnect(#[source] BackendError),
}

impl SessionError {
    /// Whether an operator has to renew the credential material.
    pub const fn needs_operator(&self) -> bool {
        matches!(
            self,
            Self::Reconnect(BackendError::SessionInvalid(_) | BackendError::Credentials(_))
        )
    }
}

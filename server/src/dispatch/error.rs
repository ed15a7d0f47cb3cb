//! Dispatch Errors

use std::time::Duration;

use thiserror::Error;

/// Ways a submission or query can fail, as seen by the bridge.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// The user's queue is full; nothing was registered.
    #[error("User {user_id} already has a request in progress")]
    UserBusy { user_id: String },

    /// No live backend session within the acquire bound.
    #[error("Session unavailable: {0}")]
    SessionUnavailable(String),

    /// The backend did not answer within the query timeout.
    #[error("Query timed out after {}s", .0.as_secs())]
    QueryTimeout(Duration),

    /// Transient backend errors outlasted the retry budget.
    #[error("Backend kept failing transiently: {0}")]
    QueryTransient(String),

    /// The session stayed invalid after a reconnect and retry.
    #[error("Backend session invalid: {0}")]
    SessionInvalid(String),

    /// Non-retryable backend error.
    #[error("Backend error: {0}")]
    Backend(String),

    /// The execution task died before producing a result.
    #[error("Query execution aborted: {0}")]
    Aborted(String),
}

impl DispatchError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::UserBusy { .. } => "USER_BUSY",
            Self::SessionUnavailable(_) => "SESSION_UNAVAILABLE",
            Self::QueryTimeout(_) => "QUERY_TIMEOUT",
            Self::QueryTransient(_) => "QUERY_TRANSIENT",
            Self::SessionInvalid(_) => "SESSION_INVALID",
            Self::Backend(_) => "BACKEND_ERROR",
            Self::Aborted(_) => "ABORTED",
        }
    }
}

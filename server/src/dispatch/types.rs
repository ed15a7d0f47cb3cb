//! Query Request Types

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::error::DispatchError;

/// Unique identifier of one submitted question.
pub type RequestId = Uuid;

/// Lifecycle status of a query request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Pending,
    InFlight,
    Succeeded,
    Failed,
    TimedOut,
}

impl QueryStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }

    /// Terminal status for an execution result.
    pub const fn from_result(result: &Result<String, DispatchError>) -> Self {
        match result {
            Ok(_) => Self::Succeeded,
            Err(DispatchError::QueryTimeout(_)) => Self::TimedOut,
            Err(_) => Self::Failed,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }
}

/// One user-submitted question.
#[derive(Debug, Clone, Serialize)]
pub struct QueryRequest {
    pub id: RequestId,
    pub user_id: String,
    pub text: String,
    pub submitted_at: DateTime<Utc>,
    pub status: QueryStatus,
}

impl QueryRequest {
    pub fn new(user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id: user_id.into(),
            text: text.into(),
            submitted_at: Utc::now(),
            status: QueryStatus::Pending,
        }
    }
}

/// Result of registering a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    pub request_id: RequestId,
    /// The user had nothing registered; a worker must be started for them.
    /// Otherwise the user's running worker picks the request up in order.
    pub needs_worker: bool,
}

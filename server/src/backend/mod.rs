//! Document QA Backend
//!
//! Contract for the session-based question-answering service, plus the HTTP
//! client that implements it.

pub mod http;
pub mod prompt;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::retry::FailureKind;

pub use http::HttpBackend;
pub use prompt::{AnswerMode, PromptBuilder};

/// Opaque credential material handed to [`QueryBackend::authenticate`].
#[derive(Clone)]
pub struct Credentials(String);

impl Credentials {
    pub fn new(material: impl Into<String>) -> Self {
        Self(material.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credentials(<redacted>)")
    }
}

/// Where credential material comes from.
///
/// The file is provisioned and renewed externally, so it is re-read on
/// every authentication attempt.
#[derive(Debug, Clone)]
pub enum CredentialSource {
    File(PathBuf),
    Static(Credentials),
}

impl CredentialSource {
    pub async fn load(&self) -> Result<Credentials, BackendError> {
        match self {
            Self::File(path) => tokio::fs::read_to_string(path)
                .await
                .map(Credentials::new)
                .map_err(|e| {
                    BackendError::Credentials(format!("{}: {e}", path.display()))
                }),
            Self::Static(credentials) => Ok(credentials.clone()),
        }
    }
}

/// Authenticated connection state returned by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionHandle {
    /// Bearer token for this connection.
    pub token: String,
    /// Source documents resolved at authentication time, reused by every query.
    pub source_ids: Vec<String>,
}

impl SessionHandle {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            source_ids: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_sources(mut self, source_ids: Vec<String>) -> Self {
        self.source_ids = source_ids;
        self
    }
}

/// Errors reported by a backend call.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("Backend rate limited the request")]
    RateLimited,
    #[error("Transient backend failure: {0}")]
    Transient(String),
    #[error("Backend rejected the session: {0}")]
    SessionInvalid(String),
    #[error("Credential material unavailable: {0}")]
    Credentials(String),
    #[error("Backend error: {0}")]
    Fatal(String),
}

impl BackendError {
    /// Retry classification of this error.
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::RateLimited | Self::Transient(_) => FailureKind::Transient,
            Self::SessionInvalid(_) => FailureKind::SessionInvalid,
            Self::Credentials(_) | Self::Fatal(_) => FailureKind::Fatal,
        }
    }
}

/// The session-based QA backend.
#[async_trait]
pub trait QueryBackend: Send + Sync + 'static {
    /// Perform a full authentication and return a fresh session handle.
    async fn authenticate(&self, credentials: &Credentials) -> Result<SessionHandle, BackendError>;

    /// Ask one question on an authenticated session.
    async fn query(&self, session: &SessionHandle, text: &str) -> Result<String, BackendError>;

    /// Lightweight no-op that confirms the session is still usable.
    async fn probe(&self, session: &SessionHandle) -> Result<(), BackendError>;
}

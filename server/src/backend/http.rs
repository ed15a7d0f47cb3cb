//! HTTP Backend Client
//!
//! Talks to the document QA service over JSON/HTTP. Authentication exchanges
//! the credential material for a bearer token and caches the notebook's
//! source list on the handle so queries skip that round trip.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{BackendError, Credentials, PromptBuilder, QueryBackend, SessionHandle};

/// Connect timeout for backend requests. Request deadlines are enforced by
/// the caller (dispatcher and prober).
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Backend client bound to one notebook.
#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    notebook_id: String,
    prompts: PromptBuilder,
}

#[derive(Serialize)]
struct CreateSessionRequest<'a> {
    notebook_id: &'a str,
    credentials: &'a str,
}

#[derive(Deserialize)]
struct CreateSessionResponse {
    token: String,
}

#[derive(Deserialize)]
struct SourceEntry {
    id: String,
}

#[derive(Deserialize)]
struct SourceListResponse {
    sources: Vec<SourceEntry>,
}

#[derive(Serialize)]
struct AskRequest<'a> {
    prompt: &'a str,
    source_ids: &'a [String],
}

#[derive(Deserialize)]
struct AskResponse {
    answer: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, notebook_id: impl Into<String>) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| BackendError::Fatal(format!("Client build error: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            notebook_id: notebook_id.into(),
            prompts: PromptBuilder::default(),
        })
    }

    /// Replace the answering instructions added to each question.
    #[must_use]
    pub fn with_prompts(mut self, prompts: PromptBuilder) -> Self {
        self.prompts = prompts;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn fetch_source_ids(&self, token: &str) -> Result<Vec<String>, BackendError> {
        let resp = self
            .client
            .get(self.url(&format!("/v1/notebooks/{}/sources", self.notebook_id)))
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport_error)?;
        let list: SourceListResponse = check_status(resp)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::Fatal(format!("Invalid source list: {e}")))?;
        Ok(list.sources.into_iter().map(|s| s.id).collect())
    }
}

#[async_trait]
impl QueryBackend for HttpBackend {
    async fn authenticate(&self, credentials: &Credentials) -> Result<SessionHandle, BackendError> {
        let resp = self
            .client
            .post(self.url("/v1/sessions"))
            .json(&CreateSessionRequest {
                notebook_id: &self.notebook_id,
                credentials: credentials.expose(),
            })
            .send()
            .await
            .map_err(transport_error)?;
        let created: CreateSessionResponse = check_status(resp)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::Fatal(format!("Invalid session response: {e}")))?;

        let source_ids = self.fetch_source_ids(&created.token).await?;
        info!(
            notebook_id = %self.notebook_id,
            sources = source_ids.len(),
            "Backend session authenticated"
        );

        Ok(SessionHandle::new(created.token).with_sources(source_ids))
    }

    async fn query(&self, session: &SessionHandle, text: &str) -> Result<String, BackendError> {
        let (prompt, mode) = self.prompts.build(text);
        debug!(mode = mode.as_str(), "Sending question to backend");
        let resp = self
            .client
            .post(self.url(&format!("/v1/notebooks/{}/ask", self.notebook_id)))
            .bearer_auth(&session.token)
            .json(&AskRequest {
                prompt: &prompt,
                source_ids: &session.source_ids,
            })
            .send()
            .await
            .map_err(transport_error)?;
        let answer: AskResponse = check_status(resp)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::Fatal(format!("Invalid answer response: {e}")))?;
        Ok(answer.answer)
    }

    async fn probe(&self, session: &SessionHandle) -> Result<(), BackendError> {
        let resp = self
            .client
            .post(self.url("/v1/sessions/refresh"))
            .bearer_auth(&session.token)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(resp).await?;
        debug!("Backend session refreshed");
        Ok(())
    }
}

fn transport_error(e: reqwest::Error) -> BackendError {
    BackendError::Transient(e.to_string())
}

/// Map a non-success response onto the backend error taxonomy.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body: String = resp
        .text()
        .await
        .unwrap_or_default()
        .chars()
        .take(200)
        .collect();
    Err(classify_status(status, body))
}

fn classify_status(status: StatusCode, body: String) -> BackendError {
    let detail = format!("HTTP {}: {body}", status.as_u16());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::SessionInvalid(detail),
        StatusCode::TOO_MANY_REQUESTS => BackendError::RateLimited,
        StatusCode::REQUEST_TIMEOUT => BackendError::Transient(detail),
        s if s.is_server_error() => BackendError::Transient(detail),
        _ => BackendError::Fatal(detail),
    }
}

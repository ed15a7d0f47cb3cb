//! Query Dispatcher
//!
//! Registers questions per user and executes them against the current
//! backend session with a hard timeout, consulting the retry table for
//! everything that fails.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Semaphore;
use uuid::Uuid;
use tracing::{error, info, instrument, warn};

use super::error::DispatchError;
use super::registry::PendingRegistry;
use super::types::{QueryRequest, QueryStatus, RequestId, Submission};
use crate::backend::QueryBackend;
use crate::retry::{FailureKind, RetryPolicy};
use crate::session::SessionManager;

/// Dispatcher settings.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Hard deadline for one backend query.
    pub query_timeout: Duration,
    /// Requests a user may have registered, the in-flight one included.
    pub per_user_queue_depth: usize,
    /// Backend queries allowed to run at once across all users.
    pub worker_pool_size: usize,
    pub retry_policy: RetryPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(45),
            per_user_queue_depth: 1,
            worker_pool_size: 8,
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Per-user single-flight dispatcher.
pub struct QueryDispatcher {
    sessions: Arc<SessionManager>,
    backend: Arc<dyn QueryBackend>,
    registry: Mutex<PendingRegistry>,
    workers: Arc<Semaphore>,
    config: DispatchConfig,
}

impl QueryDispatcher {
    pub fn new(
        sessions: Arc<SessionManager>,
        backend: Arc<dyn QueryBackend>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            sessions,
            backend,
            registry: Mutex::new(PendingRegistry::new()),
            workers: Arc::new(Semaphore::new(config.worker_pool_size.max(1))),
            config,
        }
    }

    pub const fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    fn registry(&self) -> MutexGuard<'_, PendingRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a question without waiting on anything.
    ///
    /// Fails with [`DispatchError::UserBusy`] when the user's queue is full.
    pub fn submit(&self, user_id: &str, text: &str) -> Result<Submission, DispatchError> {
        self.registry()
            .register(user_id, text, self.config.per_user_queue_depth)
    }

    /// Take the user's next request and mark it in flight.
    pub fn begin_next(&self, user_id: &str) -> Option<QueryRequest> {
        self.registry().begin_next(user_id)
    }

    /// Retire a finished request. Returns whether the user has more waiting.
    pub fn finish(&self, user_id: &str, request_id: RequestId, status: QueryStatus) -> bool {
        self.registry().complete(user_id, request_id, status)
    }

    /// Copy of the user's in-flight request, if any.
    pub fn in_flight(&self, user_id: &str) -> Option<QueryRequest> {
        self.registry().in_flight(user_id).cloned()
    }

    /// Requests registered for the user, in-flight one included.
    pub fn registered(&self, user_id: &str) -> usize {
        self.registry().registered(user_id)
    }

    pub fn active_users(&self) -> usize {
        self.registry().active_users()
    }

    /// Run one request to a terminal result.
    #[instrument(skip(self, request), fields(request_id = %request.id, user_id = %request.user_id))]
    pub async fn execute(&self, request: &QueryRequest) -> Result<String, DispatchError> {
        let _permit = Arc::clone(&self.workers)
            .acquire_owned()
            .await
            .map_err(|e| DispatchError::Aborted(e.to_string()))?;

        let policy = &self.config.retry_policy;
        let mut retries: HashMap<FailureKind, u32> = HashMap::new();

        loop {
            let lease = self
                .sessions
                .acquire_session()
                .await
                .map_err(|e| DispatchError::SessionUnavailable(e.to_string()))?;
            let session_id = lease.id();

            let result = tokio::time::timeout(
                self.config.query_timeout,
                self.backend.query(lease.handle(), &request.text),
            )
            .await;

            let (kind, detail) = match result {
                Ok(Ok(answer)) => {
                    self.sessions.record_query_success(&lease);
                    info!(chars = answer.chars().count(), "Query answered");
                    return Ok(answer);
                }
                Ok(Err(e)) => (e.kind(), e.to_string()),
                Err(_) => (
                    FailureKind::Timeout,
                    format!("no answer within {:?}", self.config.query_timeout),
                ),
            };

            // Only transient errors count against the session
            if kind == FailureKind::Transient {
                self.sessions.record_query_failure(&lease);
            }
            drop(lease);

            let done = retries.entry(kind).or_default();
            let Some(delay) = policy.next_delay(kind, *done) else {
                return Err(self.give_up(kind, session_id, detail, *done));
            };
            *done += 1;
            warn!(
                failure = kind.as_str(),
                error = %detail,
                attempt = *done,
                delay_ms = delay.as_millis() as u64,
                "Query failed, retrying"
            );

            if kind == FailureKind::SessionInvalid {
                if let Err(e) = self.sessions.reconnect_after(session_id).await {
                    error!(error = %e, "Reconnect after invalid session failed");
                    return Err(DispatchError::SessionInvalid(e.to_string()));
                }
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    /// Terminal error once the retry budget for `kind` is spent.
    fn give_up(
        &self,
        kind: FailureKind,
        session_id: Uuid,
        detail: String,
        retries: u32,
    ) -> DispatchError {
        match kind {
            FailureKind::Timeout => {
                warn!(
                    timeout_secs = self.config.query_timeout.as_secs(),
                    retries, "Query timed out, abandoning"
                );
                DispatchError::QueryTimeout(self.config.query_timeout)
            }
            FailureKind::Transient => {
                warn!(error = %detail, retries, "Transient failures exhausted retries");
                DispatchError::QueryTransient(detail)
            }
            FailureKind::SessionInvalid => {
                error!(
                    session_id = %session_id,
                    error = %detail,
                    "Session still invalid after reconnect; credentials may need renewal"
                );
                DispatchError::SessionInvalid(detail)
            }
            FailureKind::Delivery | FailureKind::Fatal => {
                warn!(error = %detail, retries, "Backend query failed");
                DispatchError::Backend(detail)
            }
        }
    }
}

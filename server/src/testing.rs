//! In-memory collaborators for tests (`test-util` feature).
//!
//! `ScriptedBackend` answers from a per-text script (echoing by default) and
//! records every call; `RecordingDelivery` keeps pushed messages in order.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::backend::{BackendError, Credentials, QueryBackend, SessionHandle};
use crate::bridge::{DeliveryError, ResponseDelivery};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One scripted backend reply.
#[derive(Debug, Clone)]
pub struct QueryStep {
    pub delay: Duration,
    pub result: Result<String, BackendError>,
}

impl QueryStep {
    pub fn answer(text: impl Into<String>) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Ok(text.into()),
        }
    }

    pub const fn fail(error: BackendError) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Err(error),
        }
    }

    #[must_use]
    pub const fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// A completed backend query.
#[derive(Debug, Clone)]
pub struct QueryRecord {
    pub text: String,
    pub token: String,
    pub started: Instant,
    pub finished: Instant,
}

#[derive(Default)]
struct Script {
    authenticate: VecDeque<Result<(), BackendError>>,
    probe: VecDeque<Result<(), BackendError>>,
    query: HashMap<String, VecDeque<QueryStep>>,
}

/// Backend double driven by queued results.
#[derive(Default)]
pub struct ScriptedBackend {
    script: Mutex<Script>,
    query_delay: Mutex<Duration>,
    authenticate_delay: Mutex<Duration>,
    query_log: Mutex<Vec<QueryRecord>>,
    authenticate_calls: AtomicU32,
    probe_calls: AtomicU32,
    query_calls: AtomicU32,
    active_queries: AtomicU32,
    overlapping_probes: AtomicU32,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_authenticate(&self, result: Result<(), BackendError>) {
        lock(&self.script).authenticate.push_back(result);
    }

    pub fn push_probe(&self, result: Result<(), BackendError>) {
        lock(&self.script).probe.push_back(result);
    }

    /// Queue the next reply for queries with exactly this text.
    pub fn push_query(&self, text: &str, step: QueryStep) {
        lock(&self.script)
            .query
            .entry(text.to_string())
            .or_default()
            .push_back(step);
    }

    /// Delay applied to unscripted queries.
    pub fn set_query_delay(&self, delay: Duration) {
        *lock(&self.query_delay) = delay;
    }

    pub fn set_authenticate_delay(&self, delay: Duration) {
        *lock(&self.authenticate_delay) = delay;
    }

    pub fn authenticate_calls(&self) -> u32 {
        self.authenticate_calls.load(Ordering::SeqCst)
    }

    pub fn probe_calls(&self) -> u32 {
        self.probe_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> u32 {
        self.query_calls.load(Ordering::SeqCst)
    }

    /// Probes that started while a query was running.
    pub fn overlapping_probes(&self) -> u32 {
        self.overlapping_probes.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<QueryRecord> {
        lock(&self.query_log).clone()
    }
}

#[async_trait]
impl QueryBackend for ScriptedBackend {
    async fn authenticate(&self, _credentials: &Credentials) -> Result<SessionHandle, BackendError> {
        let n = self.authenticate_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *lock(&self.authenticate_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let scripted = lock(&self.script).authenticate.pop_front();
        scripted.unwrap_or(Ok(()))?;
        Ok(SessionHandle::new(format!("token-{n}")).with_sources(vec!["doc-a".into()]))
    }

    async fn query(&self, session: &SessionHandle, text: &str) -> Result<String, BackendError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.active_queries.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();

        let step = lock(&self.script)
            .query
            .get_mut(text)
            .and_then(VecDeque::pop_front);
        let step = step.unwrap_or_else(|| {
            QueryStep::answer(format!("answer: {text}")).after(*lock(&self.query_delay))
        });
        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }

        self.active_queries.fetch_sub(1, Ordering::SeqCst);
        lock(&self.query_log).push(QueryRecord {
            text: text.to_string(),
            token: session.token.clone(),
            started,
            finished: Instant::now(),
        });
        step.result
    }

    async fn probe(&self, _session: &SessionHandle) -> Result<(), BackendError> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        if self.active_queries.load(Ordering::SeqCst) > 0 {
            self.overlapping_probes.fetch_add(1, Ordering::SeqCst);
        }
        let scripted = lock(&self.script).probe.pop_front();
        scripted.unwrap_or(Ok(()))
    }
}

/// Delivery double that records pushes in arrival order.
#[derive(Default)]
pub struct RecordingDelivery {
    pushes: Mutex<Vec<(String, String)>>,
    failures: Mutex<VecDeque<DeliveryError>>,
    attempts: AtomicU32,
}

impl RecordingDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next push attempt fail.
    pub fn fail_next(&self, error: DeliveryError) {
        lock(&self.failures).push_back(error);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Successfully delivered `(user_id, message)` pairs.
    pub fn pushes(&self) -> Vec<(String, String)> {
        lock(&self.pushes).clone()
    }

    pub fn pushes_for(&self, user_id: &str) -> Vec<String> {
        lock(&self.pushes)
            .iter()
            .filter(|(user, _)| user == user_id)
            .map(|(_, message)| message.clone())
            .collect()
    }

    /// Wait until at least `count` pushes landed or `timeout` passes.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<(String, String)> {
        let deadline = Instant::now() + timeout;
        loop {
            let pushes = self.pushes();
            if pushes.len() >= count || Instant::now() >= deadline {
                return pushes;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl ResponseDelivery for RecordingDelivery {
    async fn push(&self, user_id: &str, message: &str) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = lock(&self.failures).pop_front() {
            return Err(error);
        }
        lock(&self.pushes).push((user_id.to_string(), message.to_string()));
        Ok(())
    }
}

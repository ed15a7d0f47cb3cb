//! Session Manager
//!
//! Owns the one current backend session. Callers borrow it through
//! [`SessionManager::acquire_session`]; a background prober keeps it warm and
//! replaces it when it fails.
//!
//! Two locks, always taken in this order:
//! - `reconnect`: single-flight gate and backoff state for authentication.
//! - `usage`: queries hold it shared for the lifetime of a [`SessionLease`];
//!   a probe holds it exclusively, so it never overlaps a query. Probes only
//!   ever *try* to take it: a session with queries running is in use and the
//!   probe is skipped, so no caller ever queues behind a slow query.
//!
//! The `current` slot itself is only touched for pointer-sized reads and
//! swaps, so readers see either the old or the new session. A swap needs no
//! gate; leases keep their own `Arc` to the session they started on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use std::time::Duration;

use tokio::sync::{Mutex, OwnedRwLockReadGuard, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::error::SessionError;
use super::types::{ProbeOutcome, Session, SessionState, SessionStatus};
use crate::backend::{BackendError, CredentialSource, QueryBackend, SessionHandle};
use crate::retry::ReconnectBackoff;

const MIN_KEEP_ALIVE_INTERVAL: Duration = Duration::from_millis(1);

/// `now + wait`, saturating at roughly thirty years out.
fn deadline_after(wait: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(wait)
        .unwrap_or_else(|| now + Duration::from_secs(86400 * 365 * 30))
}

/// Session manager settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Interval between keep-alive probes.
    pub keep_alive_interval: Duration,
    /// Consecutive probe/query failures that fail the session.
    pub failure_threshold: u32,
    /// Idle time without a keep-alive after which a live session is stale.
    pub stale_after: Duration,
    /// Upper bound on waiting for a live session.
    pub acquire_timeout: Duration,
    /// Deadline for a single probe.
    pub probe_timeout: Duration,
    /// Deadline for a full authentication.
    pub authenticate_timeout: Duration,
    /// Backoff between failed reconnect attempts.
    pub reconnect_backoff: ReconnectBackoff,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keep_alive_interval: Duration::from_secs(60),
            failure_threshold: 3,
            stale_after: Duration::from_secs(180),
            acquire_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(10),
            authenticate_timeout: Duration::from_secs(60),
            reconnect_backoff: ReconnectBackoff::default(),
        }
    }
}

struct ReconnectGate {
    backoff: ReconnectBackoff,
    not_before: Option<Instant>,
}

/// Borrowed access to the live session for the duration of one backend call.
///
/// Holding a lease keeps probes and swaps out; drop it before asking the
/// manager to reconnect.
pub struct SessionLease {
    session: Arc<Session>,
    _usage: OwnedRwLockReadGuard<()>,
}

impl SessionLease {
    pub fn id(&self) -> Uuid {
        self.session.id()
    }

    pub fn handle(&self) -> &SessionHandle {
        self.session.handle()
    }
}

/// Process-wide owner of the backend session.
pub struct SessionManager {
    backend: Arc<dyn QueryBackend>,
    credentials: CredentialSource,
    config: SessionConfig,
    current: StdRwLock<Option<Arc<Session>>>,
    usage: Arc<RwLock<()>>,
    reconnect: Mutex<ReconnectGate>,
    reconnects: AtomicU64,
}

impl SessionManager {
    pub fn new(
        backend: Arc<dyn QueryBackend>,
        credentials: CredentialSource,
        config: SessionConfig,
    ) -> Self {
        let backoff = config.reconnect_backoff.clone();
        Self {
            backend,
            credentials,
            config,
            current: StdRwLock::new(None),
            usage: Arc::new(RwLock::new(())),
            reconnect: Mutex::new(ReconnectGate {
                backoff,
                not_before: None,
            }),
            reconnects: AtomicU64::new(0),
        }
    }

    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn current(&self) -> Option<Arc<Session>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn install(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        self.current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(session)
    }

    /// Snapshot of the current session and reconnect counter.
    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            session: self.current().map(|s| s.snapshot()),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }

    /// Return a lease on the current live session, reconnecting or probing
    /// as needed, or fail once the acquire bound elapses.
    pub async fn acquire_session(&self) -> Result<SessionLease, SessionError> {
        let deadline = deadline_after(self.config.acquire_timeout);
        match tokio::time::timeout_at(deadline, self.acquire_live(deadline)).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::Unavailable(format!(
                "no live session within {}s",
                self.config.acquire_timeout.as_secs()
            ))),
        }
    }

    async fn acquire_live(&self, deadline: Instant) -> Result<SessionLease, SessionError> {
        let mut just_probed = false;
        loop {
            let usage = Arc::clone(&self.usage).read_owned().await;
            let current = self.current();
            let failed_id = match current {
                Some(session) => {
                    let state = if just_probed {
                        session.state()
                    } else {
                        session.refresh_state(self.config.stale_after)
                    };
                    match state {
                        SessionState::Live => {
                            return Ok(SessionLease {
                                session,
                                _usage: usage,
                            });
                        }
                        SessionState::Stale => {
                            drop(usage);
                            debug!(session_id = %session.id(), "Session stale, probing before use");
                            match self.probe().await {
                                Ok(ProbeOutcome::InUse) => {
                                    session.resume_in_use();
                                }
                                Ok(_) => {}
                                Err(e) => {
                                    debug!(error = %e, "Probe before use did not restore session");
                                }
                            }
                            just_probed = true;
                            continue;
                        }
                        SessionState::Initializing | SessionState::Failed => Some(session.id()),
                    }
                }
                None => None,
            };
            drop(usage);
            just_probed = false;

            match self.reconnect_replacing(failed_id).await {
                Ok(()) => {}
                Err(SessionError::BackoffActive { retry_in }) => {
                    if deadline_after(retry_in) >= deadline {
                        return Err(SessionError::Unavailable(format!(
                            "reconnect backing off for {}s",
                            retry_in.as_secs()
                        )));
                    }
                    tokio::time::sleep(retry_in).await;
                }
                Err(e) => return Err(SessionError::Unavailable(e.to_string())),
            }
        }
    }

    /// Probe the current session once.
    ///
    /// A missing or failed session is reconnected instead. Reaching the
    /// failure threshold fails the session and triggers one reconnect. While
    /// queries hold the session the probe is skipped with
    /// [`ProbeOutcome::InUse`].
    #[instrument(skip(self))]
    pub async fn probe(&self) -> Result<ProbeOutcome, SessionError> {
        let session = match self.current() {
            Some(session) if session.state() != SessionState::Failed => session,
            other => {
                self.reconnect_replacing(other.map(|s| s.id())).await?;
                return Ok(ProbeOutcome::Reconnected);
            }
        };
        let Ok(usage) = self.usage.try_write() else {
            debug!(session_id = %session.id(), "Queries running, skipping probe");
            return Ok(ProbeOutcome::InUse);
        };
        // Replaced between the read and taking the gate
        if self.current().map(|s| s.id()) != Some(session.id()) {
            return Ok(ProbeOutcome::Reconnected);
        }

        let failure =
            match tokio::time::timeout(self.config.probe_timeout, self.backend.probe(session.handle()))
                .await
            {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some("probe timed out".to_string()),
            };

        let Some(reason) = failure else {
            session.record_keep_alive();
            debug!(session_id = %session.id(), "Keep-alive probe succeeded");
            return Ok(ProbeOutcome::Healthy);
        };

        let consecutive_failures = session.record_failure(self.config.failure_threshold);
        warn!(
            session_id = %session.id(),
            consecutive_failures,
            threshold = self.config.failure_threshold,
            error = %reason,
            "Keep-alive probe failed"
        );
        if consecutive_failures < self.config.failure_threshold {
            return Ok(ProbeOutcome::Degraded {
                consecutive_failures,
            });
        }

        drop(usage);
        self.reconnect_replacing(Some(session.id())).await?;
        Ok(ProbeOutcome::Reconnected)
    }

    /// Authenticate from scratch and install a new live session,
    /// discarding the current one.
    pub async fn reconnect(&self) -> Result<(), SessionError> {
        let current_id = self.current().map(|s| s.id());
        self.reconnect_replacing(current_id).await
    }

    /// Reconnect on behalf of a caller that saw `failed` go bad.
    ///
    /// A no-op if another caller already installed a different live session.
    pub async fn reconnect_after(&self, failed: Uuid) -> Result<(), SessionError> {
        self.reconnect_replacing(Some(failed)).await
    }

    async fn reconnect_replacing(&self, failed: Option<Uuid>) -> Result<(), SessionError> {
        let mut gate = self.reconnect.lock().await;

        if let Some(current) = self.current() {
            if Some(current.id()) != failed && current.state() != SessionState::Failed {
                debug!(session_id = %current.id(), "Session already replaced");
                return Ok(());
            }
            current.mark_failed();
        }

        if let Some(not_before) = gate.not_before {
            let now = Instant::now();
            if now < not_before {
                return Err(SessionError::BackoffActive {
                    retry_in: not_before - now,
                });
            }
        }

        info!(replacing = ?failed, "Authenticating backend session");
        match self.authenticate().await {
            Ok(handle) => {
                let session = Arc::new(Session::initializing(handle));
                session.mark_live();
                let session_id = session.id();
                self.install(session);
                gate.backoff.reset();
                gate.not_before = None;
                self.reconnects.fetch_add(1, Ordering::Relaxed);
                info!(session_id = %session_id, "Backend session live");
                Ok(())
            }
            Err(e) => {
                let retry_in = gate.backoff.next_delay();
                gate.not_before = Some(deadline_after(retry_in));
                let err = SessionError::Reconnect(e);
                if err.needs_operator() {
                    error!(
                        error = %err,
                        retry_in_secs = retry_in.as_secs(),
                        "Backend rejected credentials; credential file may need manual renewal"
                    );
                } else {
                    error!(
                        error = %err,
                        retry_in_secs = retry_in.as_secs(),
                        "Backend reconnect failed"
                    );
                }
                Err(err)
            }
        }
    }

    async fn authenticate(&self) -> Result<SessionHandle, BackendError> {
        let credentials = self.credentials.load().await?;
        tokio::time::timeout(
            self.config.authenticate_timeout,
            self.backend.authenticate(&credentials),
        )
        .await
        .map_err(|_| BackendError::Transient("authentication timed out".into()))?
    }

    /// Report a successful query on a leased session.
    pub fn record_query_success(&self, lease: &SessionLease) {
        lease.session.record_query_success();
    }

    /// Report a failed query on a leased session. Repeated failures fail the
    /// session; the next acquire or probe replaces it.
    pub fn record_query_failure(&self, lease: &SessionLease) {
        let failures = lease.session.record_failure(self.config.failure_threshold);
        if failures >= self.config.failure_threshold {
            warn!(
                session_id = %lease.id(),
                consecutive_failures = failures,
                "Session failed after repeated query errors"
            );
        }
    }

    /// Establish the first session, then probe on the keep-alive interval
    /// until `cancel` fires.
    pub fn spawn_keep_alive(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.run_keep_alive(cancel).await })
    }

    async fn run_keep_alive(&self, cancel: CancellationToken) {
        info!(
            interval_secs = self.config.keep_alive_interval.as_secs(),
            "Session keep-alive started"
        );

        if let Err(e) = self.reconnect().await {
            warn!(error = %e, "Initial backend session not established");
        }

        let period = self.config.keep_alive_interval.max(MIN_KEEP_ALIVE_INTERVAL);
        let mut ticker = tokio::time::interval_at(deadline_after(period), period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.probe().await {
                Ok(ProbeOutcome::Reconnected) => info!("Keep-alive replaced backend session"),
                Ok(ProbeOutcome::InUse) => debug!("Keep-alive skipped, session busy with queries"),
                Ok(_) => {}
                Err(SessionError::BackoffActive { retry_in }) => {
                    debug!(retry_in_secs = retry_in.as_secs(), "Keep-alive waiting on reconnect backoff");
                }
                Err(e) => warn!(error = %e, "Keep-alive could not restore session"),
            }
        }

        info!("Session keep-alive stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Credentials;
    use crate::testing::ScriptedBackend;

    fn test_config() -> SessionConfig {
        SessionConfig {
            keep_alive_interval: Duration::from_millis(20),
            failure_threshold: 3,
            stale_after: Duration::from_secs(60),
            acquire_timeout: Duration::from_millis(500),
            probe_timeout: Duration::from_millis(100),
            authenticate_timeout: Duration::from_millis(200),
            reconnect_backoff: ReconnectBackoff::new(
                Duration::from_millis(50),
                Duration::from_millis(400),
            ),
        }
    }

    fn manager(backend: &Arc<ScriptedBackend>, config: SessionConfig) -> Arc<SessionManager> {
        Arc::new(SessionManager::new(
            Arc::clone(backend) as Arc<dyn QueryBackend>,
            CredentialSource::Static(Credentials::new("creds")),
            config,
        ))
    }

    #[tokio::test]
    async fn test_acquire_connects_lazily() {
        let backend = Arc::new(ScriptedBackend::new());
        let sessions = manager(&backend, test_config());
        assert!(sessions.status().session.is_none());

        let lease = sessions.acquire_session().await.unwrap();
        assert_eq!(lease.handle().token, "token-1");
        assert_eq!(backend.authenticate_calls(), 1);

        let status = sessions.status();
        assert_eq!(status.session.unwrap().state, SessionState::Live);
        assert_eq!(status.reconnects, 1);
    }

    #[tokio::test]
    async fn test_acquire_reuses_live_session() {
        let backend = Arc::new(ScriptedBackend::new());
        let sessions = manager(&backend, test_config());

        let first = sessions.acquire_session().await.unwrap().id();
        let second = sessions.acquire_session().await.unwrap().id();
        assert_eq!(first, second);
        assert_eq!(backend.authenticate_calls(), 1);
    }

    #[tokio::test]
    async fn test_probe_failures_trigger_single_reconnect() {
        let backend = Arc::new(ScriptedBackend::new());
        let sessions = manager(&backend, test_config());
        sessions.reconnect().await.unwrap();
        let original = sessions.status().session.unwrap().id;

        for _ in 0..3 {
            backend.push_probe(Err(BackendError::Transient("reset".into())));
        }

        assert_eq!(
            sessions.probe().await.unwrap(),
            ProbeOutcome::Degraded {
                consecutive_failures: 1
            }
        );
        assert_eq!(
            sessions.probe().await.unwrap(),
            ProbeOutcome::Degraded {
                consecutive_failures: 2
            }
        );
        assert_eq!(sessions.probe().await.unwrap(), ProbeOutcome::Reconnected);

        // One initial authentication plus exactly one reconnect
        assert_eq!(backend.authenticate_calls(), 2);
        let snapshot = sessions.status().session.unwrap();
        assert_ne!(snapshot.id, original);
        assert_eq!(snapshot.state, SessionState::Live);
        assert_eq!(snapshot.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_probe_success_resets_failures() {
        let backend = Arc::new(ScriptedBackend::new());
        let sessions = manager(&backend, test_config());
        sessions.reconnect().await.unwrap();

        backend.push_probe(Err(BackendError::Transient("reset".into())));
        sessions.probe().await.unwrap();
        assert_eq!(sessions.status().session.unwrap().consecutive_failures, 1);

        assert_eq!(sessions.probe().await.unwrap(), ProbeOutcome::Healthy);
        assert_eq!(sessions.status().session.unwrap().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_reconnect_failure_backs_off() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_authenticate(Err(BackendError::Transient("down".into())));
        let sessions = manager(&backend, test_config());

        let err = sessions.reconnect().await.unwrap_err();
        assert!(matches!(err, SessionError::Reconnect(_)));

        // Immediately retrying is refused without touching the backend
        let err = sessions.reconnect().await.unwrap_err();
        assert!(matches!(err, SessionError::BackoffActive { .. }));
        assert_eq!(backend.authenticate_calls(), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        sessions.reconnect().await.unwrap();
        assert_eq!(backend.authenticate_calls(), 2);
    }

    #[tokio::test]
    async fn test_acquire_gives_up_when_backend_down() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_authenticate(Err(BackendError::SessionInvalid("expired".into())));
        let sessions = manager(&backend, test_config());

        let err = sessions.acquire_session().await.err().unwrap();
        assert!(matches!(err, SessionError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_stale_session_is_probed_before_use() {
        let backend = Arc::new(ScriptedBackend::new());
        let config = SessionConfig {
            stale_after: Duration::ZERO,
            ..test_config()
        };
        let sessions = manager(&backend, config);
        sessions.reconnect().await.unwrap();
        let probes_before = backend.probe_calls();

        // With a zero stale interval every acquire probes first; the lease is
        // handed out right after the probe marks the session live.
        let lease = sessions.acquire_session().await.unwrap();
        assert_eq!(backend.probe_calls(), probes_before + 1);
        assert_eq!(backend.authenticate_calls(), 1);
        drop(lease);
    }

    #[tokio::test]
    async fn test_query_failures_fail_session() {
        let backend = Arc::new(ScriptedBackend::new());
        let sessions = manager(&backend, test_config());
        let original = {
            let lease = sessions.acquire_session().await.unwrap();
            for _ in 0..3 {
                sessions.record_query_failure(&lease);
            }
            lease.id()
        };
        assert_eq!(
            sessions.status().session.unwrap().state,
            SessionState::Failed
        );

        let lease = sessions.acquire_session().await.unwrap();
        assert_ne!(lease.id(), original);
        assert_eq!(backend.authenticate_calls(), 2);
    }

    #[tokio::test]
    async fn test_probe_never_overlaps_query() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.set_query_delay(Duration::from_millis(80));
        let sessions = manager(&backend, test_config());
        sessions.reconnect().await.unwrap();

        let query = {
            let sessions = Arc::clone(&sessions);
            let backend = Arc::clone(&backend);
            tokio::spawn(async move {
                let lease = sessions.acquire_session().await.unwrap();
                backend.query(lease.handle(), "slow").await.unwrap();
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(sessions.probe().await.unwrap(), ProbeOutcome::InUse);
        query.await.unwrap();

        assert_eq!(backend.overlapping_probes(), 0);
        assert_eq!(sessions.probe().await.unwrap(), ProbeOutcome::Healthy);
        assert_eq!(backend.probe_calls(), 1);
    }

    #[tokio::test]
    async fn test_acquire_not_blocked_by_keep_alive_during_slow_query() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.set_query_delay(Duration::from_millis(800));
        let sessions = manager(&backend, test_config());
        sessions.reconnect().await.unwrap();

        let slow = {
            let sessions = Arc::clone(&sessions);
            let backend = Arc::clone(&backend);
            tokio::spawn(async move {
                let lease = sessions.acquire_session().await.unwrap();
                backend.query(lease.handle(), "slow").await.unwrap();
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let probe = {
            let sessions = Arc::clone(&sessions);
            tokio::spawn(async move { sessions.probe().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let started = Instant::now();
        let lease = sessions.acquire_session().await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(100));
        drop(lease);

        assert_eq!(probe.await.unwrap().unwrap(), ProbeOutcome::InUse);
        slow.await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_session_in_use_is_handed_out() {
        let backend = Arc::new(ScriptedBackend::new());
        let config = SessionConfig {
            stale_after: Duration::from_millis(30),
            ..test_config()
        };
        let sessions = manager(&backend, config);
        sessions.reconnect().await.unwrap();

        let held = sessions.acquire_session().await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        // Stale now, but the held lease keeps the probe out
        let started = Instant::now();
        let lease = sessions.acquire_session().await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(lease.id(), held.id());
        assert_eq!(backend.probe_calls(), 0);
        assert_eq!(
            sessions.status().session.unwrap().state,
            SessionState::Live
        );
    }

    #[tokio::test]
    async fn test_concurrent_reconnects_are_single_flight() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.set_authenticate_delay(Duration::from_millis(50));
        let sessions = manager(&backend, test_config());

        let mut handles = Vec::new();
        for _ in 0..4 {
            let sessions = Arc::clone(&sessions);
            handles.push(tokio::spawn(async move {
                sessions.acquire_session().await.map(|lease| lease.id())
            }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(backend.authenticate_calls(), 1);
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_keep_alive_loop_survives_zero_interval() {
        let backend = Arc::new(ScriptedBackend::new());
        let config = SessionConfig {
            keep_alive_interval: Duration::ZERO,
            ..test_config()
        };
        let sessions = manager(&backend, config);
        let cancel = CancellationToken::new();

        let handle = sessions.spawn_keep_alive(cancel.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(backend.authenticate_calls(), 1);
        assert!(backend.probe_calls() >= 1);
    }

    #[tokio::test]
    async fn test_keep_alive_loop_connects_and_probes() {
        let backend = Arc::new(ScriptedBackend::new());
        let sessions = manager(&backend, test_config());
        let cancel = CancellationToken::new();

        let handle = sessions.spawn_keep_alive(cancel.clone());
        tokio::time::sleep(Duration::from_millis(90)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(backend.authenticate_calls(), 1);
        assert!(backend.probe_calls() >= 2);
        assert_eq!(
            sessions.status().session.unwrap().state,
            SessionState::Live
        );
    }
}

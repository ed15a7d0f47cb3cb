//! Session Types

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::backend::SessionHandle;

/// Lifecycle state of a backend session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Authentication in progress; never visible through the manager.
    Initializing,
    /// Usable for queries.
    Live,
    /// Nothing confirmed the session within the stale interval; must be
    /// probed before use.
    Stale,
    /// Too many consecutive failures; waiting to be replaced.
    Failed,
}

impl SessionState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Live => "live",
            Self::Stale => "stale",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug)]
struct SessionHealth {
    state: SessionState,
    last_successful_query_at: Option<DateTime<Utc>>,
    last_keep_alive_at: DateTime<Utc>,
    /// Last successful probe or query.
    last_confirmed: Instant,
    consecutive_failures: u32,
}

/// One authenticated backend connection.
///
/// Identity and handle are fixed at construction; only health bookkeeping
/// changes, and only through the session manager.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    handle: SessionHandle,
    established_at: DateTime<Utc>,
    health: Mutex<SessionHealth>,
}

impl Session {
    pub(super) fn initializing(handle: SessionHandle) -> Self {
        Self {
            id: Uuid::now_v7(),
            handle,
            established_at: Utc::now(),
            health: Mutex::new(SessionHealth {
                state: SessionState::Initializing,
                last_successful_query_at: None,
                last_keep_alive_at: Utc::now(),
                last_confirmed: Instant::now(),
                consecutive_failures: 0,
            }),
        }
    }

    pub const fn id(&self) -> Uuid {
        self.id
    }

    pub const fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn state(&self) -> SessionState {
        self.health().state
    }

    fn health(&self) -> MutexGuard<'_, SessionHealth> {
        self.health.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn mark_live(&self) {
        let mut health = self.health();
        health.state = SessionState::Live;
        health.consecutive_failures = 0;
        health.last_keep_alive_at = Utc::now();
        health.last_confirmed = Instant::now();
    }

    pub(super) fn mark_failed(&self) {
        self.health().state = SessionState::Failed;
    }

    /// Demote a live session to stale once neither a probe nor a query
    /// succeeded within `stale_after`. Returns the resulting state.
    pub(super) fn refresh_state(&self, stale_after: Duration) -> SessionState {
        let mut health = self.health();
        if health.state == SessionState::Live && health.last_confirmed.elapsed() >= stale_after {
            health.state = SessionState::Stale;
        }
        health.state
    }

    /// Successful probe. A failed session stays failed.
    pub(super) fn record_keep_alive(&self) -> bool {
        let mut health = self.health();
        if health.state == SessionState::Failed {
            return false;
        }
        health.state = SessionState::Live;
        health.consecutive_failures = 0;
        health.last_keep_alive_at = Utc::now();
        health.last_confirmed = Instant::now();
        true
    }

    /// A stale session that queries are already running on goes back to
    /// live; those queries report its health.
    pub(super) fn resume_in_use(&self) -> SessionState {
        let mut health = self.health();
        if health.state == SessionState::Stale {
            health.state = SessionState::Live;
            health.last_confirmed = Instant::now();
        }
        health.state
    }

    pub(super) fn record_query_success(&self) {
        let mut health = self.health();
        health.last_successful_query_at = Some(Utc::now());
        health.last_confirmed = Instant::now();
        health.consecutive_failures = 0;
    }

    /// Count one probe or query failure, failing the session at `threshold`.
    /// Returns the new failure count.
    pub(super) fn record_failure(&self, threshold: u32) -> u32 {
        let mut health = self.health();
        health.consecutive_failures = health.consecutive_failures.saturating_add(1);
        if health.consecutive_failures >= threshold {
            health.state = SessionState::Failed;
        }
        health.consecutive_failures
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let health = self.health();
        SessionSnapshot {
            id: self.id,
            state: health.state,
            established_at: self.established_at,
            last_keep_alive_at: health.last_keep_alive_at,
            last_successful_query_at: health.last_successful_query_at,
            consecutive_failures: health.consecutive_failures,
        }
    }
}

/// Point-in-time view of a session for logs and the health route.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub state: SessionState,
    pub established_at: DateTime<Utc>,
    pub last_keep_alive_at: DateTime<Utc>,
    pub last_successful_query_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

/// Manager-level status: the current session (if any) plus counters.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session: Option<SessionSnapshot>,
    pub reconnects: u64,
}

/// Result of one keep-alive probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Probe succeeded; failures reset.
    Healthy,
    /// Probe failed below the threshold.
    Degraded { consecutive_failures: u32 },
    /// The session was failed or missing and a new one was installed.
    Reconnected,
    /// Queries were running on the session; the probe was skipped.
    InUse,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live_session() -> Session {
        let session = Session::initializing(SessionHandle::new("token"));
        session.mark_live();
        session
    }

    #[test]
    fn test_new_session_starts_initializing() {
        let session = Session::initializing(SessionHandle::new("token"));
        assert_eq!(session.state(), SessionState::Initializing);
        assert_eq!(session.snapshot().consecutive_failures, 0);
    }

    #[test]
    fn test_failures_reach_threshold() {
        let session = live_session();
        assert_eq!(session.record_failure(3), 1);
        assert_eq!(session.record_failure(3), 2);
        assert_eq!(session.state(), SessionState::Live);
        assert_eq!(session.record_failure(3), 3);
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[test]
    fn test_keep_alive_resets_failures() {
        let session = live_session();
        session.record_failure(3);
        session.record_failure(3);
        assert!(session.record_keep_alive());
        assert_eq!(session.snapshot().consecutive_failures, 0);
    }

    #[test]
    fn test_failed_session_is_not_revived() {
        let session = live_session();
        session.mark_failed();
        assert!(!session.record_keep_alive());
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[test]
    fn test_idle_session_turns_stale() {
        let session = live_session();
        assert_eq!(
            session.refresh_state(Duration::from_secs(60)),
            SessionState::Live
        );
        assert_eq!(session.refresh_state(Duration::ZERO), SessionState::Stale);
        assert!(session.record_keep_alive());
        assert_eq!(session.state(), SessionState::Live);
    }

    #[test]
    fn test_query_success_is_recorded() {
        let session = live_session();
        session.record_failure(3);
        session.record_query_success();
        let snapshot = session.snapshot();
        assert!(snapshot.last_successful_query_at.is_some());
        assert_eq!(snapshot.consecutive_failures, 0);
    }

    #[test]
    fn test_query_success_keeps_session_fresh() {
        let session = live_session();
        std::thread::sleep(Duration::from_millis(30));
        session.record_query_success();
        assert_eq!(
            session.refresh_state(Duration::from_millis(20)),
            SessionState::Live
        );
    }

    #[test]
    fn test_stale_session_resumes_when_in_use() {
        let session = live_session();
        assert_eq!(session.refresh_state(Duration::ZERO), SessionState::Stale);
        assert_eq!(session.resume_in_use(), SessionState::Live);

        session.mark_failed();
        assert_eq!(session.resume_in_use(), SessionState::Failed);
    }
}

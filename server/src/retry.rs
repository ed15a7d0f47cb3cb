//! Retry & Backoff Policy
//!
//! One table mapping each failure kind to its retry budget and delay
//! schedule. The dispatcher, the bridge and the session manager all consult
//! it instead of carrying their own retry loops.

use std::time::Duration;

/// Failure kinds that carry a retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Rate limit or network hiccup reported by the backend.
    Transient,
    /// Backend rejected the session; retried once after a reconnect.
    SessionInvalid,
    /// Backend exceeded the query timeout.
    Timeout,
    /// Push delivery failed.
    Delivery,
    /// Anything the backend reports that retrying cannot fix.
    Fatal,
}

impl FailureKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::SessionInvalid => "session_invalid",
            Self::Timeout => "timeout",
            Self::Delivery => "delivery",
            Self::Fatal => "fatal",
        }
    }
}

/// Retry budget for one failure kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryRule {
    /// Delay before each retry; the number of entries is the retry budget.
    pub delays: Vec<Duration>,
}

impl RetryRule {
    /// A rule that never retries.
    pub const fn none() -> Self {
        Self { delays: Vec::new() }
    }

    pub fn with_delays(delays: &[Duration]) -> Self {
        Self {
            delays: delays.to_vec(),
        }
    }
}

/// Declarative retry table keyed by [`FailureKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub transient: RetryRule,
    pub session_invalid: RetryRule,
    pub timeout: RetryRule,
    pub delivery: RetryRule,
    pub fatal: RetryRule,
}

/// Retry delays for transient backend errors (1s, then 3s).
const TRANSIENT_DELAYS: [Duration; 2] = [Duration::from_secs(1), Duration::from_secs(3)];

/// Delay before the single post-reconnect retry.
const SESSION_INVALID_DELAYS: [Duration; 1] = [Duration::ZERO];

/// Delay before the single push redelivery.
const DELIVERY_DELAYS: [Duration; 1] = [Duration::from_secs(2)];

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            transient: RetryRule::with_delays(&TRANSIENT_DELAYS),
            session_invalid: RetryRule::with_delays(&SESSION_INVALID_DELAYS),
            timeout: RetryRule::none(),
            delivery: RetryRule::with_delays(&DELIVERY_DELAYS),
            fatal: RetryRule::none(),
        }
    }
}

impl RetryPolicy {
    pub const fn rule(&self, kind: FailureKind) -> &RetryRule {
        match kind {
            FailureKind::Transient => &self.transient,
            FailureKind::SessionInvalid => &self.session_invalid,
            FailureKind::Timeout => &self.timeout,
            FailureKind::Delivery => &self.delivery,
            FailureKind::Fatal => &self.fatal,
        }
    }

    /// Delay before retry number `retries_done + 1`, or `None` once the
    /// budget for `kind` is spent.
    pub fn next_delay(&self, kind: FailureKind, retries_done: u32) -> Option<Duration> {
        self.rule(kind).delays.get(retries_done as usize).copied()
    }
}

/// Capped exponential backoff between failed reconnect attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectBackoff {
    initial: Duration,
    cap: Duration,
    current: Option<Duration>,
}

impl ReconnectBackoff {
    pub const fn new(initial: Duration, cap: Duration) -> Self {
        Self {
            initial,
            cap,
            current: None,
        }
    }

    /// Record a failed attempt and return how long to wait before the next.
    pub fn next_delay(&mut self) -> Duration {
        let next = match self.current {
            None => self.initial,
            Some(prev) => prev.saturating_mul(2).min(self.cap),
        };
        self.current = Some(next);
        next
    }

    /// Forget past failures after a successful attempt.
    pub fn reset(&mut self) {
        self.current = None;
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(300))
    }
}

//! Backend Session Lifecycle
//!
//! Keeps one authenticated backend session warm with a background prober and
//! hands it out to queries through short-lived leases.

pub mod error;
pub mod manager;
pub mod types;

pub use error::SessionError;
pub use manager::{SessionConfig, SessionLease, SessionManager};
pub use types::{ProbeOutcome, SessionSnapshot, SessionState, SessionStatus};

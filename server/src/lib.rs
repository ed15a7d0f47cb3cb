//! QA Bridge Server
//!
//! Messaging webhook front door for a session-based document QA backend.
//! Keeps one backend session warm, runs questions in the background and
//! pushes each answer back to the user who asked.

pub mod api;
pub mod backend;
pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod retry;
pub mod session;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod webhook;

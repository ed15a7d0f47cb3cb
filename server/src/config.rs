//! Server Configuration
//!
//! Loads configuration from environment variables.

use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

use crate::backend::PromptBuilder;
use crate::dispatch::DispatchConfig;
use crate::retry::{ReconnectBackoff, RetryPolicy};
use crate::session::SessionConfig;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g., "0.0.0.0:5000")
    pub bind_address: String,

    /// Backend notebook/session identifier every query is scoped to
    pub backend_session_id: String,

    /// Base URL of the document QA backend
    pub backend_base_url: String,

    /// Path of the externally provisioned credential file
    pub credential_file_path: String,

    /// Seconds between keep-alive probes (default: 60)
    pub keep_alive_interval_secs: u64,

    /// Consecutive probe/query failures before the session is failed (default: 3)
    pub keep_alive_failure_threshold: u32,

    /// Seconds without a keep-alive before a live session counts as stale
    /// (default: 3x the keep-alive interval)
    pub session_stale_after_secs: u64,

    /// Maximum wait for a live session before giving up (default: 10)
    pub session_acquire_timeout_secs: u64,

    /// Timeout for a single keep-alive probe (default: 10)
    pub probe_timeout_secs: u64,

    /// Hard timeout for one backend query (default: 45)
    pub query_timeout_secs: u64,

    /// Requests a user may have registered, the in-flight one included (default: 1)
    pub per_user_queue_depth: usize,

    /// Initial reconnect backoff in seconds (default: 5)
    pub reconnect_backoff_initial_secs: u64,

    /// Reconnect backoff cap in seconds (default: 300)
    pub reconnect_backoff_cap_secs: u64,

    /// Concurrent backend queries across all users (default: 8)
    pub worker_pool_size: usize,

    /// Messaging channel secret used to verify webhook signatures
    pub line_channel_secret: String,

    /// Messaging channel access token used for push delivery
    pub line_channel_access_token: String,

    /// Push API base URL (default: `https://api.line.me`)
    pub push_api_base_url: String,

    /// Text appended to every successful answer (optional)
    pub answer_suffix: Option<String>,

    /// Instruction appended to ordinary questions (optional override)
    pub prompt_concise_instruction: Option<String>,

    /// Instruction appended to questions asking for detail (optional override)
    pub prompt_detailed_instruction: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let keep_alive_interval_secs = env_parse::<u64>("KEEP_ALIVE_INTERVAL_SECS")
            .unwrap_or(60)
            .max(1);
        let (reconnect_backoff_initial_secs, reconnect_backoff_cap_secs) =
            env::var("RECONNECT_BACKOFF_SECS")
                .ok()
                .and_then(|v| parse_backoff_pair(&v))
                .unwrap_or((5, 300));

        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:5000".into()),
            backend_session_id: env::var("BACKEND_SESSION_ID")
                .context("BACKEND_SESSION_ID must be set")?,
            backend_base_url: env::var("BACKEND_BASE_URL")
                .context("BACKEND_BASE_URL must be set")?,
            credential_file_path: env::var("CREDENTIAL_FILE_PATH")
                .unwrap_or_else(|_| "storage_state.json".into()),
            keep_alive_interval_secs,
            keep_alive_failure_threshold: env_parse("KEEP_ALIVE_FAILURE_THRESHOLD").unwrap_or(3),
            session_stale_after_secs: env_parse("SESSION_STALE_AFTER_SECS")
                .unwrap_or(keep_alive_interval_secs.saturating_mul(3)),
            session_acquire_timeout_secs: env_parse("SESSION_ACQUIRE_TIMEOUT_SECS").unwrap_or(10),
            probe_timeout_secs: env_parse("PROBE_TIMEOUT_SECS").unwrap_or(10),
            query_timeout_secs: env_parse("QUERY_TIMEOUT_SECS").unwrap_or(45),
            per_user_queue_depth: env_parse("PER_USER_QUEUE_DEPTH").unwrap_or(1),
            reconnect_backoff_initial_secs,
            reconnect_backoff_cap_secs,
            worker_pool_size: env_parse("WORKER_POOL_SIZE").unwrap_or(8),
            line_channel_secret: env::var("LINE_CHANNEL_SECRET")
                .context("LINE_CHANNEL_SECRET must be set")?,
            line_channel_access_token: env::var("LINE_CHANNEL_ACCESS_TOKEN")
                .context("LINE_CHANNEL_ACCESS_TOKEN must be set")?,
            push_api_base_url: env::var("PUSH_API_BASE_URL")
                .unwrap_or_else(|_| "https://api.line.me".into()),
            answer_suffix: env::var("ANSWER_SUFFIX").ok().filter(|s| !s.is_empty()),
            prompt_concise_instruction: env::var("PROMPT_CONCISE_INSTRUCTION").ok(),
            prompt_detailed_instruction: env::var("PROMPT_DETAILED_INSTRUCTION").ok(),
        })
    }

    /// Session manager settings derived from this configuration.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            keep_alive_interval: Duration::from_secs(self.keep_alive_interval_secs.max(1)),
            failure_threshold: self.keep_alive_failure_threshold.max(1),
            stale_after: Duration::from_secs(self.session_stale_after_secs),
            acquire_timeout: Duration::from_secs(self.session_acquire_timeout_secs),
            probe_timeout: Duration::from_secs(self.probe_timeout_secs),
            reconnect_backoff: ReconnectBackoff::new(
                Duration::from_secs(self.reconnect_backoff_initial_secs),
                Duration::from_secs(self.reconnect_backoff_cap_secs),
            ),
            ..SessionConfig::default()
        }
    }

    /// Dispatcher settings derived from this configuration.
    #[must_use]
    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            query_timeout: Duration::from_secs(self.query_timeout_secs),
            per_user_queue_depth: self.per_user_queue_depth.max(1),
            worker_pool_size: self.worker_pool_size.max(1),
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Prompt instructions, defaults overridden by whatever is configured.
    #[must_use]
    pub fn prompt_builder(&self) -> PromptBuilder {
        PromptBuilder::default().with_instructions(
            self.prompt_concise_instruction.clone(),
            self.prompt_detailed_instruction.clone(),
        )
    }

    /// Create a default configuration for testing.
    ///
    /// Points both HTTP collaborators at unroutable local ports; tests swap in
    /// in-memory backends and delivery instead of talking to them.
    #[must_use]
    pub fn default_for_test() -> Self {
        Self {
            bind_address: "127.0.0.1:5000".into(),
            backend_session_id: "test-notebook".into(),
            backend_base_url: "http://127.0.0.1:9".into(),
            credential_file_path: "storage_state.json".into(),
            keep_alive_interval_secs: 60,
            keep_alive_failure_threshold: 3,
            session_stale_after_secs: 180,
            session_acquire_timeout_secs: 10,
            probe_timeout_secs: 10,
            query_timeout_secs: 45,
            per_user_queue_depth: 1,
            reconnect_backoff_initial_secs: 5,
            reconnect_backoff_cap_secs: 300,
            worker_pool_size: 8,
            line_channel_secret: "test-channel-secret".into(),
            line_channel_access_token: "test-access-token".into(),
            push_api_base_url: "http://127.0.0.1:9".into(),
            answer_suffix: None,
            prompt_concise_instruction: None,
            prompt_detailed_instruction: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Parses a backoff from "initial_secs,cap_secs" format.
fn parse_backoff_pair(val: &str) -> Option<(u64, u64)> {
    let parts: Vec<&str> = val.split(',').collect();
    if parts.len() == 2 {
        let initial: u64 = parts[0].trim().parse().ok()?;
        let cap: u64 = parts[1].trim().parse().ok()?;
        (initial > 0 && cap >= initial).then_some((initial, cap))
    } else {
        None
    }
}

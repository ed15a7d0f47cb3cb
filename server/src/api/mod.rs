//! API Router and Application State
//!
//! Central routing configuration and shared state.

use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::bridge::ConcurrencyBridge;
use crate::config::Config;
use crate::session::{SessionManager, SessionStatus};
use crate::webhook;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration
    pub config: Arc<Config>,
    /// Owner of the backend session
    pub sessions: Arc<SessionManager>,
    /// Hands webhook messages to background execution
    pub bridge: Arc<ConcurrencyBridge>,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(config: Config, sessions: Arc<SessionManager>, bridge: Arc<ConcurrencyBridge>) -> Self {
        Self {
            config: Arc::new(config),
            sessions,
            bridge,
        }
    }
}

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/callback", post(webhook::handlers::callback))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    /// Service status
    status: &'static str,
    /// Current backend session
    session: SessionStatus,
    /// Users with a request registered
    active_users: usize,
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        session: state.sessions.status(),
        active_users: state.bridge.dispatcher().active_users(),
    })
}

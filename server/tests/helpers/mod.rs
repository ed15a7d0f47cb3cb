//! Reusable test helpers for HTTP integration tests.
//!
//! Provides `TestApp` for sending requests through the full axum router with
//! an in-memory backend and push delivery behind it.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use qa_bridge::api::{create_router, AppState};
use qa_bridge::backend::{CredentialSource, Credentials, QueryBackend};
use qa_bridge::bridge::{ConcurrencyBridge, ReplyMessages, ResponseDelivery};
use qa_bridge::config::Config;
use qa_bridge::dispatch::QueryDispatcher;
use qa_bridge::session::SessionManager;
use qa_bridge::testing::{RecordingDelivery, ScriptedBackend};
use qa_bridge::webhook::{sign_body, SIGNATURE_HEADER};
use tower::ServiceExt;

/// Router plus handles on its in-memory collaborators.
pub struct TestApp {
    pub router: Router,
    pub config: Config,
    pub backend: Arc<ScriptedBackend>,
    pub delivery: Arc<RecordingDelivery>,
    pub sessions: Arc<SessionManager>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(Config::default_for_test())
    }

    pub fn with_config(config: Config) -> Self {
        let backend = Arc::new(ScriptedBackend::new());
        let delivery = Arc::new(RecordingDelivery::new());
        let backend_dyn = Arc::clone(&backend) as Arc<dyn QueryBackend>;

        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&backend_dyn),
            CredentialSource::Static(Credentials::new("test-credentials")),
            config.session_config(),
        ));
        let dispatcher = Arc::new(QueryDispatcher::new(
            Arc::clone(&sessions),
            backend_dyn,
            config.dispatch_config(),
        ));
        let bridge = Arc::new(ConcurrencyBridge::new(
            dispatcher,
            Arc::clone(&delivery) as Arc<dyn ResponseDelivery>,
            ReplyMessages::default().with_answer_suffix(config.answer_suffix.clone()),
        ));

        let state = AppState::new(config.clone(), Arc::clone(&sessions), bridge);
        Self {
            router: create_router(state),
            config,
            backend,
            delivery,
            sessions,
        }
    }

    /// Send a request through the router.
    pub async fn oneshot(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("Router should not fail")
    }

    /// POST a callback body signed with the configured channel secret.
    pub async fn post_signed(&self, body: &str) -> Response<Body> {
        let signature = sign_body(&self.config.line_channel_secret, body.as_bytes())
            .expect("HMAC accepts any key length");
        let request = Request::builder()
            .method(Method::POST)
            .uri("/callback")
            .header("content-type", "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(Body::from(body.to_string()))
            .expect("Failed to build request");
        self.oneshot(request).await
    }

    /// Wait for `count` pushes to land.
    pub async fn pushes(&self, count: usize) -> Vec<(String, String)> {
        self.delivery.wait_for(count, Duration::from_secs(3)).await
    }
}

/// Callback body carrying one text message per `(user_id, text)` pair.
pub fn text_events(messages: &[(&str, &str)]) -> String {
    let events: Vec<serde_json::Value> = messages
        .iter()
        .enumerate()
        .map(|(i, (user_id, text))| {
            serde_json::json!({
                "type": "message",
                "replyToken": format!("reply-{i}"),
                "timestamp": 1_700_000_000_000_i64 + i as i64,
                "source": { "type": "user", "userId": user_id },
                "message": { "type": "text", "id": format!("m{i}"), "text": text }
            })
        })
        .collect();
    serde_json::json!({ "destination": "Ubot", "events": events }).to_string()
}

/// Collect a response body as bytes.
pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes()
        .to_vec()
}

/// Parse a response body as JSON.
pub async fn body_to_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).expect("Body is not JSON")
}

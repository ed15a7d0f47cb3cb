//! QA Bridge Server - Main Entry Point

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use qa_bridge::api;
use qa_bridge::backend::{CredentialSource, HttpBackend, QueryBackend};
use qa_bridge::bridge::{ConcurrencyBridge, LinePushClient, ReplyMessages, ResponseDelivery};
use qa_bridge::config;
use qa_bridge::dispatch::QueryDispatcher;
use qa_bridge::session::SessionManager;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "qa_bridge=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = %config.backend_base_url,
        "Starting QA Bridge"
    );

    let backend: Arc<dyn QueryBackend> = Arc::new(
        HttpBackend::new(&config.backend_base_url, &config.backend_session_id)
            .context("Failed to build backend client")?
            .with_prompts(config.prompt_builder()),
    );
    let sessions = Arc::new(SessionManager::new(
        Arc::clone(&backend),
        CredentialSource::File(PathBuf::from(&config.credential_file_path)),
        config.session_config(),
    ));

    // Establish the first session in the background and keep it warm
    let shutdown = CancellationToken::new();
    let keep_alive = sessions.spawn_keep_alive(shutdown.clone());

    let dispatcher = Arc::new(QueryDispatcher::new(
        Arc::clone(&sessions),
        backend,
        config.dispatch_config(),
    ));
    let delivery: Arc<dyn ResponseDelivery> = Arc::new(
        LinePushClient::new(&config.push_api_base_url, &config.line_channel_access_token)
            .context("Failed to build push client")?,
    );
    let bridge = Arc::new(ConcurrencyBridge::new(
        dispatcher,
        delivery,
        ReplyMessages::default().with_answer_suffix(config.answer_suffix.clone()),
    ));

    let bind_address = config.bind_address.clone();
    let state = api::AppState::new(config, sessions, bridge);
    let app = api::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {bind_address}"))?;
    info!(address = %bind_address, "Server listening");

    // Graceful shutdown handler
    let shutdown_signal = {
        let shutdown = shutdown.clone();
        async move {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to install CTRL+C signal handler");
            info!("Received shutdown signal, cleaning up...");
            shutdown.cancel();
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    shutdown.cancel();
    if let Err(e) = keep_alive.await {
        tracing::warn!("Keep-alive task ended abnormally: {}", e);
    }

    info!("Server shutdown complete");

    Ok(())
}

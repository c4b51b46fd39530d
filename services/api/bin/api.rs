//! Main Entrypoint for the Voice Relay API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Building the signed URL issuer.
//! 3. Constructing the Axum router.
//! 4. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use std::{net::SocketAddr, sync::Arc};
use tracing::{error, info, warn};
use voice_relay_api::{
    config::Config, issuer::ElevenLabsIssuer, router::create_router, state::AppState,
};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    if config.elevenlabs_api_key.is_none() || config.agent_id.is_none() {
        warn!("ElevenLabs credentials are missing; signed URL requests will be rejected.");
    }

    // --- 3. Initialize Shared Services ---
    let issuer = ElevenLabsIssuer::from_config(&config).context("Failed to build issuer")?;
    let app_state = Arc::new(AppState {
        issuer: Arc::new(issuer),
        config: Arc::new(config.clone()),
    });

    // --- 4. Create Router ---
    let app = create_router(app_state);

    // --- 5. Start Server ---
    info!(
        bind_address = %config.bind_address,
        upstream_prefix = config.relay_upstream_prefix.as_deref().unwrap_or("<any>"),
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}

//! StreamRelay server binary
//!
//! # Usage
//!
//! ```bash
//! # Defaults: 0.0.0.0:5000, output in ./hls, overlays in ./overlays.json
//! cargo run -p streamrelay-http-server
//!
//! # From a config file
//! STREAMRELAY_CONFIG=/etc/streamrelay.toml cargo run -p streamrelay-http-server
//!
//! # With logging
//! RUST_LOG=debug cargo run -p streamrelay-http-server
//! ```

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use streamrelay_core::Supervisor;
use streamrelay_http_server::{
    api::{build_router, AppState},
    config::Config,
    overlays::OverlayStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting StreamRelay...");

    // Load configuration
    let config_path = std::env::var("STREAMRELAY_CONFIG").ok();
    let config = Config::load(config_path.as_deref()).context("Failed to load configuration")?;
    let config = Arc::new(config);

    tracing::info!(
        "Configuration: bind={}, hls_dir={}, engine={}, overlays={}",
        config.bind_addr(),
        config.streams.hls_dir.display(),
        config.streams.engine,
        config.overlays.db_file.display()
    );

    // Session supervisor
    let supervisor = Supervisor::new(config.streams.supervisor_config())
        .context("Failed to create HLS output directory")?;

    // Overlay store
    let overlays = Arc::new(OverlayStore::open(&config.overlays.db_file).await);

    // Build HTTP router
    let state = AppState::new(supervisor.clone(), overlays, config.clone());
    let router = build_router(state);

    // Start HTTP server
    let bind_addr = config.bind_addr();
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    tracing::info!("HTTP server listening on {}", bind_addr);

    // Run the HTTP server with graceful shutdown on SIGTERM/SIGINT
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, initiating graceful shutdown...");
        })
        .await?;

    // No transcoding process outlives the server
    supervisor.shutdown().await;

    tracing::info!("StreamRelay shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

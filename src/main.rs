//! Royale Match Server - authoritative battle royale match core
//!
//! This is the main entry point for the match server. It handles:
//! - Hosting one or more matches, each on its own tick loop
//! - WebSocket connections for match requests and broadcasts
//! - HTTP endpoints for health and match listing

mod app;
mod config;
mod game;
mod http;
mod util;
mod ws;

use std::net::SocketAddr;

use futures::future::join_all;
use rand::Rng;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::app::AppState;
use crate::config::Config;
use crate::game::GameMatch;
use crate::http::build_router;
use crate::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    // Initialize server time tracking
    init_server_time();

    info!("Starting Royale Match Server");
    info!("Server address: {}", config.server_addr);
    info!(
        mode = ?config.rules.mode,
        deploy = ?config.rules.deploy_mode,
        storm_phases = config.rules.storm_phases.len(),
        "Match rules loaded"
    );
    if config.rules.solo_testing {
        warn!("SOLO_TESTING is enabled, single-player matches never auto-win");
    }

    // Create application state
    let state = AppState::new(config.clone());

    // Spawn match instances
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut match_tasks = Vec::new();
    for _ in 0..config.match_instances.max(1) {
        let id = Uuid::new_v4();
        let seed = rand::thread_rng().gen::<u64>();
        let (game_match, handle) = GameMatch::new(id, state.rules.clone(), seed);
        state.match_registry.insert(handle);

        let registry = state.match_registry.clone();
        let shutdown = shutdown_rx.clone();
        match_tasks.push(tokio::spawn(async move {
            game_match.run(shutdown).await;
            registry.remove(&id);
        }));
        info!(match_id = %id, seed, "Match instance spawned");
    }

    // Build router
    let router = build_router(state);

    // Start server
    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the match loops and wait for them to unregister
    let _ = shutdown_tx.send(true);
    for result in join_all(match_tasks).await {
        if let Err(e) = result {
            warn!(error = %e, "Match task failed");
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}

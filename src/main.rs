//! RPS Tournament Server - single-elimination rock-paper-scissors over WebSockets
//!
//! This is the main entry point for the server. It handles:
//! - WebSocket connections for joining and playing
//! - The tournament service that owns all bracket and match state
//! - A health endpoint for monitoring

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rps_tournament_server::app::AppState;
use rps_tournament_server::config::Config;
use rps_tournament_server::http::build_router;
use rps_tournament_server::tournament::{TournamentOutcome, TournamentService};
use rps_tournament_server::util::time::init_server_time;

/// Time allowed for open sessions to deliver their last messages on shutdown
const SESSION_DRAIN: Duration = Duration::from_secs(3);

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

    info!("Starting RPS Tournament Server");
    info!("Server address: {}", config.server_addr);
    info!(
        start_delay_secs = config.tournament.start_delay.as_secs(),
        min_players = config.tournament.min_players,
        "Tournament settings"
    );

    // Spawn tournament service
    let (service, handle) = TournamentService::new(&config.tournament);
    let service_task = tokio::spawn(service.run());

    // Build router
    let state = AppState::new(config.clone(), handle);
    let sessions = state.sessions.clone();
    let router = build_router(state);

    // Start server
    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(service_task))
        .await?;

    // Upgraded sockets are not covered by graceful shutdown
    let open = sessions.active();
    if open > 0 {
        info!(sessions = open, "Waiting for sessions to flush");
        if tokio::time::timeout(SESSION_DRAIN, sessions.wait_idle()).await.is_err() {
            warn!(sessions = sessions.active(), "Sessions still open after drain timeout");
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

/// Resolves on Ctrl+C, SIGTERM, or when the tournament service stops
async fn shutdown_signal(service_task: JoinHandle<Option<TournamentOutcome>>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
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
        outcome = service_task => {
            match outcome {
                Ok(Some(TournamentOutcome::Champion(champion_id))) => {
                    info!(champion_id, "Tournament ended. Shutting down server.");
                }
                Ok(_) => info!("Tournament service stopped, shutting down"),
                Err(e) => tracing::error!(error = %e, "Tournament service task failed"),
            }
        }
    }
}

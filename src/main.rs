use anyhow::{Context, Result};
use review_assigner::db::{self, SqliteGateway};
use review_assigner::services::server::{start_server, AppState};
use review_assigner::services::ReviewerSelector;
use review_assigner::Config;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration from environment")?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.log_level))
        .init();

    log::info!(
        "[main] Starting review-assigner (db: {})",
        config.database_path.display()
    );

    let pool = db::initialize(&config.database_path)
        .await
        .context("Failed to initialize database")?;

    let selector = match config.reviewer_seed {
        Some(seed) => {
            log::info!("[main] Reviewer selection seeded with {}", seed);
            ReviewerSelector::seeded(seed)
        }
        None => ReviewerSelector::from_entropy(),
    };

    let shutdown = CancellationToken::new();
    let state = AppState::new(
        Arc::new(SqliteGateway::new(pool.clone())),
        selector,
        shutdown.clone(),
        config.request_timeout,
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let handle = start_server(addr, state)
        .await
        .with_context(|| format!("Failed to start server on {}", addr))?;

    wait_for_signal().await;
    handle.stop().await;
    pool.close().await;

    log::info!("[main] Shutdown complete");
    Ok(())
}

/// Resolve on Ctrl-C, or SIGTERM on unix.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("[main] Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("[main] Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => log::info!("[main] Received Ctrl-C"),
        _ = terminate => log::info!("[main] Received SIGTERM"),
    }
}

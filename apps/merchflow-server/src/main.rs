//! # MerchFlow Server
//!
//! HTTP entry point for the ordering core.
//!
//! ## Startup Sequence
//! 1. Initialize tracing (`RUST_LOG`, default `info`)
//! 2. Load configuration (file, then `MERCHFLOW_*` overrides)
//! 3. Connect to SQLite & run migrations
//! 4. Build the engine and spawn the sweeper
//! 5. Serve until Ctrl+C / SIGTERM, then stop the sweeper and close the pool
//!
//! ## Usage
//! ```bash
//! merchflow-server                      # default config location
//! merchflow-server ./merchflow.toml     # explicit config file
//! ```

use std::path::PathBuf;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use merchflow_db::{Database, DbConfig};
use merchflow_engine::{Engine, EngineConfig, Ports};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting MerchFlow server");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = EngineConfig::load(config_path).context("Failed to load configuration")?;

    let db = Database::new(DbConfig::new(&config.server.database_path))
        .await
        .context("Failed to open database")?;
    info!(path = %config.server.database_path.display(), "Database ready");

    let bind_address = config.server.bind_address();
    let ports = Ports::local(&db, &config);
    let engine = Engine::new(db.clone(), config, ports);

    let (sweeper, sweeper_handle) = engine.sweeper();
    let sweeper_task = tokio::spawn(sweeper.run());

    let app = merchflow_server::router(engine);
    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;
    info!(addr = %bind_address, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    sweeper_handle.shutdown().await;
    if let Err(e) = sweeper_task.await {
        warn!(error = %e, "Sweeper task ended abnormally");
    }
    db.close().await;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}

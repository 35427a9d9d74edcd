//! ciwi server
//!
//! Scheduler and API server: owns the SQLite store, leases queued job
//! executions to capability-matched agents, reduces their status reports,
//! and sweeps stale leases and timed-out jobs.

pub mod api;
pub mod config;
pub mod db;
pub mod repository;
pub mod service;
pub mod state;

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use config::ServerConfig;
pub use state::AppState;

/// Shared handle type for the secret resolver
pub type SharedSecretResolver = Arc<dyn service::secret::SecretResolver>;

/// Run the server until `shutdown` is cancelled
pub async fn run(config: ServerConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = config.addr.clone();
    let state = build_state(config, shutdown).await?;

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    serve(listener, state).await
}

/// Open the store and prepare everything the server needs
pub async fn build_state(
    config: ServerConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<AppState> {
    config.validate().context("invalid server configuration")?;

    tracing::info!(db_path = %config.db_path.display(), "Opening database");
    let pool = db::create_pool(&config.db_path)
        .await
        .context("failed to open database")?;
    db::run_migrations(&pool)
        .await
        .context("failed to run database migrations")?;

    tokio::fs::create_dir_all(&config.artifacts_dir)
        .await
        .with_context(|| {
            format!(
                "failed to create artifacts dir {}",
                config.artifacts_dir.display()
            )
        })?;

    service::update::reconcile_on_startup(&pool)
        .await
        .context("failed to read update progress")?;

    Ok(AppState::new(pool, config, shutdown))
}

/// Serve the API on `listener` until the state's shutdown token is cancelled
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    let shutdown = state.shutdown.clone();
    let sweeper = service::maintenance::spawn_sweeper(state.clone(), shutdown.clone());

    let app = api::create_router(state);

    tracing::info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("server error")?;

    sweeper.abort();
    tracing::info!("Server stopped");
    Ok(())
}

//! Server self-update
//!
//! Runs the shared updater for the server binary in the background and
//! records its progress in app-state so it survives the restart.

use ciwi_core::dto::state::UpdateProgress;
use ciwi_core::version::Version;
use ciwi_update::{UpdateOutcome, UpdateSettings, Updater};
use sqlx::SqlitePool;
use thiserror::Error;

use crate::config::ServerConfig;
use crate::repository::app_state_repository::{self, UPDATE_MESSAGE, UPDATE_STATUS, UPDATE_TARGET};
use crate::state::AppState;

pub const STATUS_RUNNING: &str = "running";
pub const STATUS_STAGED: &str = "staged";
pub const STATUS_RESTARTING: &str = "restarting";
pub const STATUS_SUCCEEDED: &str = "succeeded";
pub const STATUS_FAILED: &str = "failed";

/// Service error type
#[derive(Debug, Error)]
pub enum ServerUpdateError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Updater settings for the server binary
pub fn settings_for(config: &ServerConfig) -> UpdateSettings {
    let mut settings = UpdateSettings::from_env();
    settings.repository = config.update_repository.clone();
    settings.api_base = config.update_api_base.clone();
    settings.service_name = config.service_name.clone();
    if let Some(manifest) = &config.staged_manifest {
        settings.staged_manifest = manifest.clone();
    }
    settings
}

/// Start updating the server to `target`
///
/// Returns once the update is recorded as running; the download and swap
/// continue in the background.
pub async fn request_update(state: &AppState, target: &str) -> Result<(), ServerUpdateError> {
    let target = target.trim().to_string();
    if Version::parse(&target).is_none() {
        return Err(ServerUpdateError::Validation(format!(
            "invalid update target {target:?}"
        )));
    }

    let progress = get_progress(&state.pool).await?;
    if progress.status == STATUS_RUNNING {
        return Err(ServerUpdateError::Conflict(format!(
            "update to {} already in progress",
            progress.target
        )));
    }

    record(&state.pool, STATUS_RUNNING, &target, "").await?;
    tracing::info!(version = %target, "Server update requested");

    let state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = run_update(&state, &target).await {
            tracing::error!("Failed to record update progress: {}", e);
        }
    });
    Ok(())
}

async fn run_update(state: &AppState, target: &str) -> Result<(), sqlx::Error> {
    let updater = match Updater::new(settings_for(&state.config), env!("CARGO_PKG_VERSION")) {
        Ok(updater) => updater,
        Err(e) => return record(&state.pool, STATUS_FAILED, target, &e.to_string()).await,
    };
    let restart_args: Vec<String> = std::env::args().skip(1).collect();

    match updater.update_to(target, restart_args).await {
        Ok(UpdateOutcome::Staged { manifest }) => {
            let message = format!("staged at {}", manifest.display());
            record(&state.pool, STATUS_STAGED, target, &message).await
        }
        Ok(UpdateOutcome::HelperStarted { exit_after, .. }) => {
            record(&state.pool, STATUS_RESTARTING, target, "").await?;
            tracing::info!(version = %target, "Update helper started, shutting down");
            tokio::time::sleep(exit_after).await;
            state.shutdown.cancel();
            Ok(())
        }
        Err(e) => {
            tracing::warn!(version = %target, "Server update failed: {}", e);
            record(&state.pool, STATUS_FAILED, target, &e.to_string()).await
        }
    }
}

/// Settle progress left behind by the previous process
///
/// An update that was running or restarting either landed (this binary is
/// the target) or was interrupted.
pub async fn reconcile_on_startup(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let progress = get_progress(pool).await?;
    if progress.status != STATUS_RUNNING && progress.status != STATUS_RESTARTING {
        return Ok(());
    }

    let current = Version::parse(env!("CARGO_PKG_VERSION"));
    if current.is_some() && current == Version::parse(&progress.target) {
        tracing::info!(version = %progress.target, "Server update completed");
        record(pool, STATUS_SUCCEEDED, &progress.target, "").await
    } else {
        tracing::warn!(version = %progress.target, "Server update was interrupted");
        record(pool, STATUS_FAILED, &progress.target, "update interrupted by restart").await
    }
}

async fn record(
    pool: &SqlitePool,
    status: &str,
    target: &str,
    message: &str,
) -> Result<(), sqlx::Error> {
    app_state_repository::set(pool, UPDATE_STATUS, status).await?;
    app_state_repository::set(pool, UPDATE_TARGET, target).await?;
    app_state_repository::set(pool, UPDATE_MESSAGE, message).await
}

/// Read the recorded progress
pub async fn get_progress(pool: &SqlitePool) -> Result<UpdateProgress, sqlx::Error> {
    Ok(UpdateProgress {
        status: value(pool, UPDATE_STATUS).await?,
        target: value(pool, UPDATE_TARGET).await?,
        message: value(pool, UPDATE_MESSAGE).await?,
    })
}

async fn value(pool: &SqlitePool, key: &str) -> Result<String, sqlx::Error> {
    Ok(app_state_repository::get(pool, key).await?.unwrap_or_default())
}

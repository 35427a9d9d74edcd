//! API Module
//!
//! HTTP API layer of the server, versioned under `/api/v1`.
//! Each submodule handles endpoints for a specific domain.

pub mod agent;
pub mod artifact;
pub mod error;
pub mod health;
pub mod job;
pub mod project;
pub mod server;
pub mod watch;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};
use ciwi_core::API_PREFIX;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Largest artifact upload body (base64 inflates the raw bytes by a third)
const MAX_UPLOAD_BODY: usize = 512 * 1024 * 1024;

/// Create the main router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        // Agent endpoints
        .route("/heartbeat", post(agent::heartbeat))
        .route("/agent/lease", post(agent::lease))
        .route("/agents", get(agent::list_agents))
        .route("/agents/{id}/update", post(agent::request_update))
        .route("/agents/{id}/restart", post(agent::request_restart))
        .route("/agents/{id}/wipe-cache", post(agent::request_cache_wipe))
        .route("/agents/{id}/wipe-history", post(agent::request_history_wipe))
        .route("/agents/{id}/flush-history", post(agent::flush_history))
        // Job endpoints
        .route("/jobs", get(job::list_jobs).post(job::enqueue_job))
        .route("/jobs/clear-queue", post(job::clear_queue))
        .route("/jobs/flush-history", post(job::flush_history))
        .route("/jobs/{id}", get(job::get_job))
        .route("/jobs/{id}", delete(job::delete_job))
        .route("/jobs/{id}/status", post(job::update_status))
        .route("/jobs/{id}/events", get(job::list_events))
        .route("/jobs/{id}/unblock", post(job::unblock_job))
        .route("/jobs/{id}/unmet", get(job::unmet_requirements))
        .route(
            "/jobs/{id}/artifacts",
            get(artifact::list_artifacts)
                .post(artifact::upload_artifacts)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BODY)),
        )
        .route(
            "/jobs/{id}/tests",
            get(artifact::get_test_report).post(artifact::upload_test_report),
        )
        // Project endpoints
        .route("/projects", get(project::list_projects))
        .route("/projects/load", post(project::load_project))
        .route("/projects/{id}", get(project::get_project))
        .route("/pipelines/{id}/trigger", post(project::trigger_pipeline))
        .route(
            "/vault/connections",
            get(project::list_vault_connections).put(project::save_vault_connection),
        )
        // Server endpoints
        .route("/state", get(watch::get_state))
        .route("/state/stream", get(watch::stream_state))
        .route(
            "/server/update",
            get(server::update_progress).post(server::request_update),
        );

    let artifacts = ServeDir::new(&state.config.artifacts_dir);

    Router::new()
        .route("/healthz", get(health::health_check))
        .nest(API_PREFIX, api)
        .nest_service("/artifacts", artifacts)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

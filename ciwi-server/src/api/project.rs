//! Project API Handlers
//!
//! Project config loading, listing and pipeline triggering.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use ciwi_core::domain::project::{ProjectDetail, ProjectSummary, VaultConnection};
use ciwi_core::dto::project::{
    LoadProjectRequest, TriggerPipelineRequest, TriggerPipelineResponse,
};

use crate::api::error::ApiResult;
use crate::service::{project_service, secret_service};
use crate::state::AppState;

// =============================================================================
// Project Endpoints
// =============================================================================

/// POST /projects/load
/// Load or reload a project from YAML config text
pub async fn load_project(
    State(state): State<AppState>,
    Json(req): Json<LoadProjectRequest>,
) -> ApiResult<Json<ProjectDetail>> {
    tracing::info!("Loading project config: {}", req.config_file);

    let project = project_service::load_project(&state.pool, req).await?;
    Ok(Json(project))
}

/// GET /projects
pub async fn list_projects(State(state): State<AppState>) -> ApiResult<Json<Vec<ProjectSummary>>> {
    Ok(Json(project_service::list_projects(&state.pool).await?))
}

/// GET /projects/{id}
pub async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ProjectDetail>> {
    Ok(Json(project_service::get_project(&state.pool, id).await?))
}

/// POST /pipelines/{id}/trigger
/// Expand a pipeline and enqueue its executions
pub async fn trigger_pipeline(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<TriggerPipelineRequest>,
) -> ApiResult<(StatusCode, Json<TriggerPipelineResponse>)> {
    tracing::info!("Triggering pipeline: {}", id);

    let job_execution_ids =
        project_service::trigger_pipeline(&state.pool, state.secrets.as_ref(), id, req).await?;
    Ok((
        StatusCode::CREATED,
        Json(TriggerPipelineResponse { job_execution_ids }),
    ))
}

// =============================================================================
// Vault Connection Endpoints
// =============================================================================

/// PUT /vault/connections
/// Create or replace a vault connection
pub async fn save_vault_connection(
    State(state): State<AppState>,
    Json(conn): Json<VaultConnection>,
) -> ApiResult<Json<VaultConnection>> {
    secret_service::save_connection(&state.pool, &conn).await?;
    Ok(Json(conn))
}

/// GET /vault/connections
pub async fn list_vault_connections(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<VaultConnection>>> {
    Ok(Json(secret_service::list_connections(&state.pool).await?))
}

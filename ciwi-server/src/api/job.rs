//! Job API Handlers
//!
//! HTTP endpoints for the job execution lifecycle and queue administration.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use ciwi_core::domain::job::JobExecution;
use ciwi_core::dto::job::{
    AffectedResponse, CreateJobExecution, JobEventsResponse, JobListResponse, StatusUpdate,
    UnmetRequirementsResponse,
};

use crate::api::error::ApiResult;
use crate::service::job_service;
use crate::state::AppState;

// =============================================================================
// Job Queue Endpoints
// =============================================================================

/// POST /jobs
/// Enqueue an ad-hoc job execution
pub async fn enqueue_job(
    State(state): State<AppState>,
    Json(req): Json<CreateJobExecution>,
) -> ApiResult<(StatusCode, Json<JobExecution>)> {
    let job = job_service::enqueue(&state.pool, req).await?;
    Ok((StatusCode::CREATED, Json(job.without_secrets())))
}

/// GET /jobs/{id}
/// Latest snapshot of a job
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobExecution>> {
    tracing::debug!("Getting job: {}", id);

    let job = job_service::get_job(&state.pool, &id).await?;
    Ok(Json(job.without_secrets()))
}

/// GET /jobs
/// Pending jobs first, then history
pub async fn list_jobs(State(state): State<AppState>) -> ApiResult<Json<JobListResponse>> {
    let jobs = job_service::list_jobs(&state.pool).await?;

    Ok(Json(JobListResponse {
        job_executions: jobs.into_iter().map(JobExecution::without_secrets).collect(),
    }))
}

/// DELETE /jobs/{id}
/// Delete a queued or leased job
pub async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    job_service::delete_pending(&state.pool, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /jobs/clear-queue
pub async fn clear_queue(State(state): State<AppState>) -> ApiResult<Json<AffectedResponse>> {
    let affected = job_service::clear_queue(&state.pool).await?;
    Ok(Json(AffectedResponse { affected }))
}

/// POST /jobs/flush-history
pub async fn flush_history(State(state): State<AppState>) -> ApiResult<Json<AffectedResponse>> {
    let affected = job_service::flush_history(&state.pool).await?;
    Ok(Json(AffectedResponse { affected }))
}

/// POST /jobs/{id}/unblock
/// Clear the dependency gates of a job by hand
pub async fn unblock_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobExecution>> {
    let job = job_service::unblock(&state.pool, &id).await?;
    Ok(Json(job.without_secrets()))
}

/// GET /jobs/{id}/unmet
/// Why no connected agent can run a queued job
pub async fn unmet_requirements(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<UnmetRequirementsResponse>> {
    let reasons = job_service::unmet_requirements(&state.pool, &state.agents, &id).await?;
    Ok(Json(UnmetRequirementsResponse { job_id: id, reasons }))
}

// =============================================================================
// Execution Endpoints (agent-facing)
// =============================================================================

/// POST /jobs/{id}/status
/// Apply a status patch from the executing agent
pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<StatusUpdate>,
) -> ApiResult<Json<serde_json::Value>> {
    tracing::debug!("Status update for job {}: {}", id, update.status);

    job_service::update_status(&state.pool, &id, update).await?;
    Ok(Json(serde_json::json!({})))
}

/// GET /jobs/{id}/events
pub async fn list_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobEventsResponse>> {
    let events = job_service::list_events(&state.pool, &id).await?;
    Ok(Json(JobEventsResponse { events }))
}

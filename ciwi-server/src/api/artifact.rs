//! Artifact and Test Report API Handlers

use axum::{
    Json,
    extract::{Path, State},
};
use ciwi_core::dto::artifact::{
    ArtifactsResponse, TestReportResponse, UploadArtifactsRequest, UploadTestReportRequest,
};

use crate::api::error::ApiResult;
use crate::service::artifact_service;
use crate::state::AppState;

/// POST /jobs/{id}/artifacts
/// Replace the artifacts of a job
pub async fn upload_artifacts(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UploadArtifactsRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    tracing::debug!("Uploading {} artifacts for job: {}", req.artifacts.len(), id);

    artifact_service::save_artifacts(&state.pool, &state.config.artifacts_dir, &id, req).await?;
    Ok(Json(serde_json::json!({})))
}

/// GET /jobs/{id}/artifacts
pub async fn list_artifacts(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ArtifactsResponse>> {
    let artifacts = artifact_service::list_artifacts(&state.pool, &id).await?;
    Ok(Json(ArtifactsResponse { artifacts }))
}

/// POST /jobs/{id}/tests
/// Store a job's test report; the last write wins
pub async fn upload_test_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UploadTestReportRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    artifact_service::save_test_report(&state.pool, &id, req).await?;
    Ok(Json(serde_json::json!({})))
}

/// GET /jobs/{id}/tests
pub async fn get_test_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<TestReportResponse>> {
    let report = artifact_service::get_test_report(&state.pool, &id).await?;
    Ok(Json(TestReportResponse { report }))
}

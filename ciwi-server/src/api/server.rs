//! Server Administration API Handlers

use axum::{
    Json,
    extract::State,
    http::StatusCode,
};
use ciwi_core::dto::state::{ServerUpdateRequest, UpdateProgress};

use crate::api::error::ApiResult;
use crate::service::update_service;
use crate::state::AppState;

/// POST /server/update
/// Start updating the server binary in the background
pub async fn request_update(
    State(state): State<AppState>,
    Json(req): Json<ServerUpdateRequest>,
) -> ApiResult<(StatusCode, Json<UpdateProgress>)> {
    update_service::request_update(&state, &req.target).await?;
    let progress = update_service::get_progress(&state.pool).await?;
    Ok((StatusCode::ACCEPTED, Json(progress)))
}

/// GET /server/update
/// Progress of the last update
pub async fn update_progress(State(state): State<AppState>) -> ApiResult<Json<UpdateProgress>> {
    Ok(Json(update_service::get_progress(&state.pool).await?))
}

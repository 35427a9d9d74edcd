//! Agent API Handlers
//!
//! Heartbeats, leases and the administrative control directives.

use axum::{
    Json,
    extract::{Path, State},
};
use ciwi_core::control::AgentControl;
use ciwi_core::domain::agent::AgentInfo;
use ciwi_core::dto::agent::{
    AgentUpdateRequest, HeartbeatRequest, HeartbeatResponse, LeaseRequest, LeaseResponse,
};
use ciwi_core::dto::job::AffectedResponse;
use ciwi_core::version::Version;

use crate::api::error::{ApiError, ApiResult};
use crate::service::job_service;
use crate::state::AppState;

// =============================================================================
// Agent Lifecycle
// =============================================================================

/// POST /heartbeat
/// Record an agent's snapshot and deliver at most one directive
pub async fn heartbeat(
    State(state): State<AppState>,
    Json(req): Json<HeartbeatRequest>,
) -> ApiResult<Json<HeartbeatResponse>> {
    tracing::debug!("Heartbeat from agent: {}", req.agent_id);

    Ok(Json(state.agents.heartbeat(req)?))
}

/// POST /agent/lease
/// Lease one queued job the agent can run
pub async fn lease(
    State(state): State<AppState>,
    Json(req): Json<LeaseRequest>,
) -> ApiResult<Json<LeaseResponse>> {
    let job = job_service::lease(&state.pool, &state.agents, &req).await?;

    let response = match job {
        Some(job) => LeaseResponse {
            assigned: true,
            job_execution: Some(job),
            message: String::new(),
        },
        None => LeaseResponse {
            assigned: false,
            job_execution: None,
            message: "no matching job".to_string(),
        },
    };
    Ok(Json(response))
}

// =============================================================================
// Agent Administration
// =============================================================================

/// GET /agents
/// Latest heartbeat snapshot of every agent
pub async fn list_agents(State(state): State<AppState>) -> Json<Vec<AgentInfo>> {
    Json(state.agents.list())
}

/// POST /agents/{id}/update
/// Queue an update directive
pub async fn request_update(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(req): Json<AgentUpdateRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let target = req.target.trim().to_string();
    if Version::parse(&target).is_none() {
        return Err(ApiError::BadRequest(format!(
            "invalid update target {target:?}"
        )));
    }

    let repository = if req.repository.trim().is_empty() {
        state.config.update_repository.clone()
    } else {
        req.repository.trim().to_string()
    };
    let api_base = if req.api_base.trim().is_empty() {
        state.config.update_api_base.clone()
    } else {
        req.api_base.trim().to_string()
    };

    state.agents.queue_control(
        &agent_id,
        AgentControl::Update {
            target,
            repository,
            api_base,
        },
    )?;
    Ok(Json(serde_json::json!({})))
}

/// POST /agents/{id}/restart
pub async fn request_restart(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    queue(&state, &agent_id, AgentControl::Restart)
}

/// POST /agents/{id}/wipe-cache
pub async fn request_cache_wipe(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    queue(&state, &agent_id, AgentControl::WipeCache)
}

/// POST /agents/{id}/wipe-history
pub async fn request_history_wipe(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    queue(&state, &agent_id, AgentControl::WipeHistory)
}

/// POST /agents/{id}/flush-history
/// Delete the finished jobs this agent executed
pub async fn flush_history(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<AffectedResponse>> {
    let affected = job_service::flush_agent_history(&state.pool, &agent_id).await?;
    Ok(Json(AffectedResponse { affected }))
}

fn queue(
    state: &AppState,
    agent_id: &str,
    control: AgentControl,
) -> ApiResult<Json<serde_json::Value>> {
    state.agents.queue_control(agent_id, control)?;
    Ok(Json(serde_json::json!({})))
}

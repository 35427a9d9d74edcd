//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::service::agent::AgentError;
use crate::service::artifact::ArtifactError;
use crate::service::job::JobError;
use crate::service::project::ProjectError;
use crate::service::secret::SecretError;
use crate::service::update::ServerUpdateError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    DatabaseError(sqlx::Error),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::DatabaseError(err) => {
                tracing::error!("Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::DatabaseError(err)
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(_) => ApiError::NotFound(err.to_string()),
            JobError::Validation(msg) => ApiError::BadRequest(msg),
            JobError::Conflict(msg) => ApiError::Conflict(msg),
            JobError::Database(e) => ApiError::DatabaseError(e),
        }
    }
}

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::NotFound(_) => ApiError::NotFound(err.to_string()),
            AgentError::Validation(msg) => ApiError::BadRequest(msg),
        }
    }
}

impl From<SecretError> for ApiError {
    fn from(err: SecretError) -> Self {
        match err {
            SecretError::Validation(msg) => ApiError::BadRequest(msg),
            SecretError::Missing(_) | SecretError::UnknownConnection(_) => {
                ApiError::BadRequest(err.to_string())
            }
            SecretError::Backend(msg) => ApiError::InternalError(msg),
            SecretError::Database(e) => ApiError::DatabaseError(e),
        }
    }
}

impl From<ProjectError> for ApiError {
    fn from(err: ProjectError) -> Self {
        match err {
            ProjectError::NotFound(_) => ApiError::NotFound(err.to_string()),
            ProjectError::Validation(msg) => ApiError::BadRequest(msg),
            ProjectError::Secret(e) => e.into(),
            ProjectError::Job(e) => e.into(),
            ProjectError::Database(e) => ApiError::DatabaseError(e),
        }
    }
}

impl From<ArtifactError> for ApiError {
    fn from(err: ArtifactError) -> Self {
        match err {
            ArtifactError::NotFound(_) => ApiError::NotFound(err.to_string()),
            ArtifactError::Validation(msg) => ApiError::BadRequest(msg),
            ArtifactError::Conflict(msg) => ApiError::Conflict(msg),
            ArtifactError::Io(e) => ApiError::InternalError(format!("artifact storage: {e}")),
            ArtifactError::Database(e) => ApiError::DatabaseError(e),
        }
    }
}

impl From<ServerUpdateError> for ApiError {
    fn from(err: ServerUpdateError) -> Self {
        match err {
            ServerUpdateError::Validation(msg) => ApiError::BadRequest(msg),
            ServerUpdateError::Conflict(msg) => ApiError::Conflict(msg),
            ServerUpdateError::Database(e) => ApiError::DatabaseError(e),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

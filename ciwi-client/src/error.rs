//! Error types for the ciwi client
//!
//! The server answers failures with `{"error": "<message>"}` and one of four
//! statuses: 400 for rejected input, 404 for a missing job/agent/project, 409
//! for a state conflict (lost lease, job not pending) and 500 for everything
//! else. Each gets its own variant so callers can branch on the kind.

use serde::Deserialize;
use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors returned by [`crate::ServerClient`]
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server was unreachable or the connection broke
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// 400: the server rejected the request body or parameters
    #[error("rejected by server: {0}")]
    Rejected(String),

    /// 404
    #[error("not found: {0}")]
    NotFound(String),

    /// 409: the job or agent is not in a state that allows the request
    #[error("conflict: {0}")]
    Conflict(String),

    /// Any other non-success status
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    /// A success response whose body is not the expected shape
    #[error("unexpected response body: {0}")]
    Decode(String),
}

/// Error body written by the server's API layer
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub error: String,
}

impl ClientError {
    /// Map an error status and message onto its variant
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            400 => Self::Rejected(message),
            404 => Self::NotFound(message),
            409 => Self::Conflict(message),
            _ => Self::Status { status, message },
        }
    }

    /// Map a raw error response body, preferring the `error` field
    pub(crate) fn from_body(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<ErrorBody>(body)
            .map(|b| b.error)
            .unwrap_or_else(|_| body.trim().to_string());
        Self::api_error(status, message)
    }

    /// HTTP status of the response, if one was received
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            Self::Rejected(_) => Some(400),
            Self::NotFound(_) => Some(404),
            Self::Conflict(_) => Some(409),
            Self::Status { status, .. } => Some(*status),
            Self::Decode(_) => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Lost lease, terminal job, or an operation on a non-pending job
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// 4xx: retrying the same request will not help
    pub fn is_client_error(&self) -> bool {
        self.status().is_some_and(|s| (400..500).contains(&s))
    }

    pub fn is_server_error(&self) -> bool {
        self.status().is_some_and(|s| s >= 500)
    }
}

//! ciwi HTTP Client
//!
//! A simple, type-safe HTTP client for the ciwi server's `/api/v1` API.
//!
//! The agent uses it for heartbeats, leases, status patches, artifacts and
//! test reports; tooling uses it to load projects and trigger pipelines.
//!
//! # Example
//!
//! ```no_run
//! use ciwi_client::ServerClient;
//! use ciwi_core::dto::job::CreateJobExecution;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ServerClient::new("http://localhost:8112");
//!
//!     let job = client.enqueue_job(&CreateJobExecution {
//!         script: "echo hello".to_string(),
//!         ..Default::default()
//!     }).await?;
//!
//!     println!("Queued job: {}", job.id);
//!     Ok(())
//! }
//! ```

pub mod error;
mod agents;
mod jobs;
mod projects;
mod server;

// Re-export commonly used types
pub use error::{ClientError, Result};

use ciwi_core::API_PREFIX;
use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client for the ciwi server API
///
/// This client provides methods for all server API endpoints, organized
/// into logical groups:
/// - Agent heartbeat, lease and control directives
/// - Job execution lifecycle (status, artifacts, test reports)
/// - Project loading and pipeline triggering
/// - Server state snapshots and self-update
#[derive(Debug, Clone)]
pub struct ServerClient {
    /// Base URL of the server (e.g., "http://localhost:8112")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl ServerClient {
    /// Create a new server client
    ///
    /// # Example
    /// ```
    /// use ciwi_client::ServerClient;
    ///
    /// let client = ServerClient::new("http://localhost:8112");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new server client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the server
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for an `/api/v1` path
    fn api_url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, API_PREFIX, path)
    }

    /// Resolves a possibly relative URL returned by the server
    pub fn resolve_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else if url.starts_with('/') {
            format!("{}{}", self.base_url, url)
        } else {
            format!("{}/{}", self.base_url, url)
        }
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle an API response and deserialize JSON
    ///
    /// This method checks the status code and returns an appropriate error if
    /// the request failed, or deserializes the response body if successful.
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            return Err(Self::error_from(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Handle an API response whose body is ignored
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        Ok(())
    }

    async fn error_from(response: reqwest::Response) -> ClientError {
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        ClientError::from_body(status, &text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = ServerClient::new("http://localhost:8112");
        assert_eq!(client.base_url(), "http://localhost:8112");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = ServerClient::new("http://localhost:8112/");
        assert_eq!(client.base_url(), "http://localhost:8112");
        assert_eq!(
            client.api_url("/heartbeat"),
            "http://localhost:8112/api/v1/heartbeat"
        );
    }

    #[test]
    fn test_resolve_url() {
        let client = ServerClient::new("http://ci:8112");
        assert_eq!(
            client.resolve_url("/artifacts/job-1/a.txt"),
            "http://ci:8112/artifacts/job-1/a.txt"
        );
        assert_eq!(
            client.resolve_url("https://other/x"),
            "https://other/x"
        );
    }
}

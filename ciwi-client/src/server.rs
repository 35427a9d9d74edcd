//! Server-level API endpoints

use crate::ServerClient;
use crate::error::Result;
use ciwi_core::domain::project::VaultConnection;
use ciwi_core::dto::state::{ServerUpdateRequest, StateSnapshot, UpdateProgress};

impl ServerClient {
    /// Check that the server is up
    pub async fn health(&self) -> Result<()> {
        let url = format!("{}/healthz", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_empty_response(response).await
    }

    /// One state snapshot, as streamed to GUI clients
    pub async fn state_snapshot(&self) -> Result<StateSnapshot> {
        let url = self.api_url("/state");
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Vault Connections
    // =============================================================================

    /// Create or replace a vault connection
    pub async fn save_vault_connection(&self, conn: &VaultConnection) -> Result<VaultConnection> {
        let url = self.api_url("/vault/connections");
        let response = self.client.put(&url).json(conn).send().await?;

        self.handle_response(response).await
    }

    /// List vault connections
    pub async fn list_vault_connections(&self) -> Result<Vec<VaultConnection>> {
        let url = self.api_url("/vault/connections");
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Server Self-Update
    // =============================================================================

    /// Ask the server to update itself to `target`
    pub async fn request_server_update(&self, target: &str) -> Result<UpdateProgress> {
        let url = self.api_url("/server/update");
        let req = ServerUpdateRequest {
            target: target.to_string(),
        };
        let response = self.client.post(&url).json(&req).send().await?;

        self.handle_response(response).await
    }

    /// Progress of the last server update
    pub async fn server_update_progress(&self) -> Result<UpdateProgress> {
        let url = self.api_url("/server/update");
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }
}

//! Agent-related API endpoints

use crate::ServerClient;
use crate::error::Result;
use ciwi_core::domain::agent::AgentInfo;
use ciwi_core::dto::job::AffectedResponse;
use ciwi_core::dto::agent::{
    AgentUpdateRequest, HeartbeatRequest, HeartbeatResponse, LeaseRequest, LeaseResponse,
};

impl ServerClient {
    // =============================================================================
    // Agent Lifecycle
    // =============================================================================

    /// Send a heartbeat to the server
    ///
    /// The response may carry one control directive (update, restart,
    /// cache wipe, history wipe).
    pub async fn heartbeat(&self, req: &HeartbeatRequest) -> Result<HeartbeatResponse> {
        let url = self.api_url("/heartbeat");
        let response = self.client.post(&url).json(req).send().await?;

        self.handle_response(response).await
    }

    /// Ask the server for one job this agent can run
    pub async fn lease(&self, req: &LeaseRequest) -> Result<LeaseResponse> {
        let url = self.api_url("/agent/lease");
        let response = self.client.post(&url).json(req).send().await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Agent Administration
    // =============================================================================

    /// List the latest heartbeat snapshot of every known agent
    pub async fn list_agents(&self) -> Result<Vec<AgentInfo>> {
        let url = self.api_url("/agents");
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Queue an update directive for an agent
    pub async fn request_agent_update(&self, agent_id: &str, req: &AgentUpdateRequest) -> Result<()> {
        let url = self.api_url(&format!("/agents/{}/update", agent_id));
        let response = self.client.post(&url).json(req).send().await?;

        self.handle_empty_response(response).await
    }

    /// Queue a restart directive for an agent
    pub async fn request_agent_restart(&self, agent_id: &str) -> Result<()> {
        self.post_agent_action(agent_id, "restart").await
    }

    /// Queue a cache wipe directive for an agent
    pub async fn request_agent_cache_wipe(&self, agent_id: &str) -> Result<()> {
        self.post_agent_action(agent_id, "wipe-cache").await
    }

    /// Queue a job-history wipe directive for an agent
    pub async fn request_agent_history_wipe(&self, agent_id: &str) -> Result<()> {
        self.post_agent_action(agent_id, "wipe-history").await
    }

    /// Delete the finished jobs an agent executed
    pub async fn flush_agent_history(&self, agent_id: &str) -> Result<u64> {
        let url = self.api_url(&format!("/agents/{}/flush-history", agent_id));
        let response = self.client.post(&url).send().await?;

        let affected: AffectedResponse = self.handle_response(response).await?;
        Ok(affected.affected)
    }

    async fn post_agent_action(&self, agent_id: &str, action: &str) -> Result<()> {
        let url = self.api_url(&format!("/agents/{}/{}", agent_id, action));
        let response = self.client.post(&url).send().await?;

        self.handle_empty_response(response).await
    }
}

//! Agents repository
//!
//! Heartbeats and lease requests.

use async_trait::async_trait;
use ciwi_client::{Result, ServerClient};
use ciwi_core::dto::agent::{HeartbeatRequest, HeartbeatResponse, LeaseRequest, LeaseResponse};

/// Repository trait for agent-level operations with the server
#[async_trait]
pub trait AgentRepository: Send + Sync {
    /// Sends a heartbeat; the reply may carry one control directive
    async fn heartbeat(&self, req: &HeartbeatRequest) -> Result<HeartbeatResponse>;

    /// Asks for one job this agent can run
    async fn lease(&self, req: &LeaseRequest) -> Result<LeaseResponse>;
}

/// HTTP implementation of AgentRepository
#[derive(Clone)]
pub struct HttpAgentRepository {
    client: ServerClient,
}

impl HttpAgentRepository {
    pub fn new(client: ServerClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AgentRepository for HttpAgentRepository {
    async fn heartbeat(&self, req: &HeartbeatRequest) -> Result<HeartbeatResponse> {
        self.client.heartbeat(req).await
    }

    async fn lease(&self, req: &LeaseRequest) -> Result<LeaseResponse> {
        self.client.lease(req).await
    }
}

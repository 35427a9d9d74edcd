//! Project-related API endpoints

use crate::ServerClient;
use crate::error::Result;
use ciwi_core::domain::project::{ProjectDetail, ProjectSummary};
use ciwi_core::dto::project::{
    LoadProjectRequest, TriggerPipelineRequest, TriggerPipelineResponse,
};

impl ServerClient {
    // =============================================================================
    // Project Management
    // =============================================================================

    /// Load or reload a project from YAML config text
    pub async fn load_project(&self, req: &LoadProjectRequest) -> Result<ProjectDetail> {
        let url = self.api_url("/projects/load");
        let response = self.client.post(&url).json(req).send().await?;

        self.handle_response(response).await
    }

    /// List all projects
    pub async fn list_projects(&self) -> Result<Vec<ProjectSummary>> {
        let url = self.api_url("/projects");
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Get a project with its pipeline tree
    pub async fn get_project(&self, project_id: i64) -> Result<ProjectDetail> {
        let url = self.api_url(&format!("/projects/{}", project_id));
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Trigger a pipeline by its database id
    pub async fn trigger_pipeline(
        &self,
        pipeline_id: i64,
        req: &TriggerPipelineRequest,
    ) -> Result<TriggerPipelineResponse> {
        let url = self.api_url(&format!("/pipelines/{}/trigger", pipeline_id));
        let response = self.client.post(&url).json(req).send().await?;

        self.handle_response(response).await
    }
}

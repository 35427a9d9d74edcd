mod common;

use ciwi_core::control::AgentControl;
use ciwi_core::domain::job::JobStatus;
use ciwi_core::domain::metadata;
use ciwi_core::domain::project::VaultConnection;
use ciwi_core::dto::agent::{AgentUpdateRequest, HeartbeatRequest};
use ciwi_core::dto::job::StatusUpdate;
use ciwi_core::dto::project::{LoadProjectRequest, TriggerPipelineRequest};

use common::{connect_agent, lease, start_server};

const PROJECT: &str = r#"
version: 1
project:
  name: demo
  repo_url: https://example.com/demo.git
  repo_ref: main
pipelines:
  - id: release
    jobs:
      - id: build
        runs_on:
          os: linux
        matrix:
          include:
            - name: first
            - name: second
        steps:
          - name: compile
            run: make {{ matrix.name }}
      - id: publish
        runs_on:
          os: linux
        needs: [build]
        steps:
          - name: upload
            run: ./publish.sh
"#;

fn update(target: &str) -> AgentUpdateRequest {
    AgentUpdateRequest {
        target: target.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_heartbeat_delivers_controls_in_order() {
    let server = start_server().await;
    let client = &server.client;

    let err = client.request_agent_restart("ghost").await.unwrap_err();
    assert!(err.is_not_found());

    connect_agent(client, "agent-a").await;
    client.request_agent_update("agent-a", &update("v1.1.0")).await.unwrap();
    client.request_agent_restart("agent-a").await.unwrap();
    client.request_agent_update("agent-a", &update("v1.2.0")).await.unwrap();
    client.request_agent_cache_wipe("agent-a").await.unwrap();

    let err = client
        .request_agent_update("agent-a", &update("latest"))
        .await
        .unwrap_err();
    assert!(err.is_client_error());

    let agents = client.list_agents().await.unwrap();
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0].update_target, "v1.2.0");
    assert_eq!(agents[0].pending_controls, 3);

    let beat = HeartbeatRequest {
        agent_id: "agent-a".to_string(),
        os: "linux".to_string(),
        ..Default::default()
    };
    let mut delivered = Vec::new();
    for _ in 0..4 {
        let response = client.heartbeat(&beat).await.unwrap();
        assert!(response.accepted);
        delivered.extend(response.controls());
    }

    assert_eq!(delivered.len(), 3);
    match &delivered[0] {
        AgentControl::Update {
            target, repository, ..
        } => {
            assert_eq!(target, "v1.2.0");
            assert!(!repository.is_empty());
        }
        other => panic!("expected update, got {other:?}"),
    }
    assert_eq!(delivered[1], AgentControl::Restart);
    assert_eq!(delivered[2], AgentControl::WipeCache);
}

#[tokio::test]
async fn test_heartbeat_records_update_failure() {
    let server = start_server().await;
    let client = &server.client;

    client
        .heartbeat(&HeartbeatRequest {
            agent_id: "agent-a".to_string(),
            update_failure: "checksum mismatch".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    let agents = client.list_agents().await.unwrap();
    assert_eq!(agents[0].update_failure, "checksum mismatch");

    let err = client
        .heartbeat(&HeartbeatRequest::default())
        .await
        .unwrap_err();
    assert!(err.is_client_error());
}

#[tokio::test]
async fn test_pipeline_needs_gate_until_dependencies_succeed() {
    let server = start_server().await;
    let client = &server.client;
    connect_agent(client, "agent-a").await;

    let project = client
        .load_project(&LoadProjectRequest {
            config_yaml: PROJECT.to_string(),
            config_file: "ciwi.yaml".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(project.project.name, "demo");
    assert_eq!(client.list_projects().await.unwrap().len(), 1);
    assert_eq!(
        client.get_project(project.project.id).await.unwrap().pipelines.len(),
        1
    );

    let pipeline_id = project.pipelines[0].id;
    let ids = client
        .trigger_pipeline(pipeline_id, &TriggerPipelineRequest::default())
        .await
        .unwrap()
        .job_execution_ids;
    assert_eq!(ids.len(), 3);

    let publish = client.get_job(&ids[2]).await.unwrap();
    assert!(publish.is_blocked());

    for _ in 0..2 {
        let job = lease(client, "agent-a").await.unwrap();
        assert!(ids[..2].contains(&job.id));
        let mut done = StatusUpdate::new("agent-a", JobStatus::Succeeded);
        done.exit_code = Some(0);
        client.update_status(&job.id, &done).await.unwrap();
    }

    let publish = client.get_job(&ids[2]).await.unwrap();
    assert!(!publish.is_blocked());
    assert_eq!(
        publish.env[metadata::DEP_ARTIFACT_JOB_IDS_ENV],
        format!("{},{}", ids[0], ids[1])
    );
    assert_eq!(lease(client, "agent-a").await.unwrap().id, ids[2]);

    let missing = client
        .trigger_pipeline(9999, &TriggerPipelineRequest::default())
        .await
        .unwrap_err();
    assert!(missing.is_not_found());
}

#[tokio::test]
async fn test_failed_dependency_fails_dependent() {
    let server = start_server().await;
    let client = &server.client;
    connect_agent(client, "agent-a").await;

    let project = client
        .load_project(&LoadProjectRequest {
            config_yaml: PROJECT.to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    let ids = client
        .trigger_pipeline(project.pipelines[0].id, &TriggerPipelineRequest::default())
        .await
        .unwrap()
        .job_execution_ids;

    let job = lease(client, "agent-a").await.unwrap();
    let mut failed = StatusUpdate::new("agent-a", JobStatus::Failed);
    failed.exit_code = Some(1);
    client.update_status(&job.id, &failed).await.unwrap();

    let publish = client.get_job(&ids[2]).await.unwrap();
    assert_eq!(publish.status, JobStatus::Failed);
    assert!(publish.error.contains(&job.id));
}

#[tokio::test]
async fn test_unblock_clears_gates() {
    let server = start_server().await;
    let client = &server.client;

    let project = client
        .load_project(&LoadProjectRequest {
            config_yaml: PROJECT.to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    let ids = client
        .trigger_pipeline(project.pipelines[0].id, &TriggerPipelineRequest::default())
        .await
        .unwrap()
        .job_execution_ids;

    let unblocked = client.unblock_job(&ids[2]).await.unwrap();
    assert!(!unblocked.is_blocked());
    assert_eq!(unblocked.status, JobStatus::Queued);
}

#[tokio::test]
async fn test_invalid_project_config_is_rejected() {
    let server = start_server().await;
    let err = server
        .client
        .load_project(&LoadProjectRequest {
            config_yaml: "project: {}\npipelines: []\n".to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(err.is_client_error());
}

#[tokio::test]
async fn test_state_snapshot_summarizes_jobs() {
    let server = start_server().await;
    let client = &server.client;
    connect_agent(client, "agent-a").await;

    let project = client
        .load_project(&LoadProjectRequest {
            config_yaml: PROJECT.to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    client
        .trigger_pipeline(project.pipelines[0].id, &TriggerPipelineRequest::default())
        .await
        .unwrap();

    let snapshot = client.state_snapshot().await.unwrap();
    assert!(!snapshot.stream_id.is_empty());
    assert_eq!(snapshot.server_info.name, "ciwi");
    assert_eq!(snapshot.projects.len(), 1);
    assert_eq!(snapshot.agents.len(), 1);
    assert_eq!(snapshot.jobs_summary.queued_count, 3);
    assert_eq!(snapshot.jobs_summary.queued_group_count, 1);
    assert_eq!(snapshot.jobs_summary.history_count, 0);
}

#[tokio::test]
async fn test_vault_connections() {
    let server = start_server().await;
    let client = &server.client;

    let conn = VaultConnection {
        name: "main".to_string(),
        url: "https://vault.example.com".to_string(),
        auth_method: "approle".to_string(),
        role_id: "role".to_string(),
        secret_id_env: "VAULT_SECRET_ID".to_string(),
    };
    client.save_vault_connection(&conn).await.unwrap();
    assert_eq!(client.list_vault_connections().await.unwrap(), vec![conn]);

    let err = client
        .save_vault_connection(&VaultConnection::default())
        .await
        .unwrap_err();
    assert!(err.is_client_error());
}

#[tokio::test]
async fn test_server_update_rejects_bad_target() {
    let server = start_server().await;
    let client = &server.client;

    let err = client.request_server_update("not-a-version").await.unwrap_err();
    assert!(err.is_client_error());
    let progress = client.server_update_progress().await.unwrap();
    assert!(progress.status.is_empty());
}

//! Shared harness: a real server on an ephemeral port

use std::collections::HashMap;
use std::time::Duration;

use ciwi_client::ServerClient;
use ciwi_core::dto::agent::{HeartbeatRequest, LeaseRequest};
use ciwi_core::domain::job::JobExecution;
use ciwi_server::ServerConfig;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub struct TestServer {
    pub client: ServerClient,
    pub shutdown: CancellationToken,
    _dir: TempDir,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub async fn start_server() -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        addr: "127.0.0.1:0".to_string(),
        db_path: dir.path().join("ciwi.db"),
        artifacts_dir: dir.path().join("artifacts"),
        maintenance_interval: Duration::from_secs(3600),
        ..Default::default()
    };

    let shutdown = CancellationToken::new();
    let state = ciwi_server::build_state(config, shutdown.clone()).await.unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        ciwi_server::serve(listener, state).await.unwrap();
    });

    TestServer {
        client: ServerClient::new(format!("http://{addr}")),
        shutdown,
        _dir: dir,
    }
}

pub fn linux_caps() -> HashMap<String, String> {
    HashMap::from([
        ("os".to_string(), "linux".to_string()),
        ("arch".to_string(), "amd64".to_string()),
    ])
}

pub async fn connect_agent(client: &ServerClient, agent_id: &str) {
    client
        .heartbeat(&HeartbeatRequest {
            agent_id: agent_id.to_string(),
            hostname: format!("{agent_id}-host"),
            os: "linux".to_string(),
            arch: "amd64".to_string(),
            version: "v1.0.0".to_string(),
            capabilities: linux_caps(),
            ..Default::default()
        })
        .await
        .unwrap();
}

pub async fn lease(client: &ServerClient, agent_id: &str) -> Option<JobExecution> {
    let response = client
        .lease(&LeaseRequest {
            agent_id: agent_id.to_string(),
            capabilities: linux_caps(),
        })
        .await
        .unwrap();
    assert_eq!(response.assigned, response.job_execution.is_some());
    response.job_execution
}

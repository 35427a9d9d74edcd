use anyhow::{Context, Result};
use ciwi_agent::AgentConfig;
use ciwi_server::ServerConfig;
use tokio::net::TcpListener;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use super::{AgentArgs, ServerArgs};

pub async fn handle_all_in_one_command(
    server: ServerArgs,
    agent: AgentArgs,
    shutdown: CancellationToken,
) -> Result<()> {
    let server_config = server.apply(ServerConfig::from_env());
    let agent_url_set = agent.server_url.is_some();
    let mut agent_config = agent.apply(AgentConfig::from_env()?);
    if !agent_url_set {
        agent_config.server_url = local_server_url(&server_config.addr);
    }

    let addr = server_config.addr.clone();
    let state = ciwi_server::build_state(server_config, shutdown.clone()).await?;
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(
        addr = %addr,
        server_url = %agent_config.server_url,
        "Starting ciwi server with local agent"
    );

    let mut server_task = tokio::spawn(ciwi_server::serve(listener, state));
    let mut agent_task = tokio::spawn(ciwi_agent::run(
        agent_config,
        super::restart_args(),
        shutdown.clone(),
    ));

    // Either side ending stops the other
    tokio::select! {
        result = &mut server_task => {
            shutdown.cancel();
            let server_result = flatten("server", result);
            let agent_result = flatten("agent", agent_task.await);
            server_result.and(agent_result)
        }
        result = &mut agent_task => {
            shutdown.cancel();
            let agent_result = flatten("agent", result);
            let server_result = flatten("server", server_task.await);
            agent_result.and(server_result)
        }
    }
}

fn flatten(role: &str, result: Result<Result<()>, JoinError>) -> Result<()> {
    result.with_context(|| format!("{role} task failed"))?
}

/// Loopback URL of a server listening on `addr`
fn local_server_url(addr: &str) -> String {
    let port = addr
        .rsplit_once(':')
        .map(|(_, port)| port)
        .filter(|port| !port.is_empty())
        .unwrap_or("8112");
    format!("http://127.0.0.1:{port}")
}

//! ciwi agent
//!
//! A worker that leases jobs from the server and executes them.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Repositories: HTTP communication with the server (agents, jobs)
//! - Engine: Workspace, checkout, caches, container, processes, reporting
//! - Services: Job execution, capability discovery, control directives
//! - Scheduler: Heartbeat and lease loops
//!
//! The agent heartbeats its capabilities, leases one job at a time, runs it
//! in an isolated workspace and streams its output back while it runs.

pub mod config;
pub mod context;
pub mod engine;
pub mod report;
pub mod repository;
pub mod scheduler;
pub mod service;

use std::sync::Arc;

use anyhow::{Context, Result};
use ciwi_client::ServerClient;
use ciwi_update::UpdateSettings;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use config::AgentConfig;

use crate::repository::{HttpAgentRepository, HttpJobRepository};
use crate::scheduler::JobPoller;
use crate::service::{
    CapabilitiesService, ControlService, ExecutionService, ReleaseSelfUpdate, SelfUpdate,
    StandardCapabilitiesService, StandardControlService, StandardExecutionService,
};

/// Version advertised in heartbeats and compared against update targets
pub fn version() -> String {
    format!("v{}", env!("CARGO_PKG_VERSION"))
}

/// Runs the agent until `shutdown` is cancelled or the server asks it to exit
///
/// `restart_args` are the command-line arguments a self-updated binary is
/// relaunched with.
pub async fn run(config: AgentConfig, restart_args: Vec<String>, shutdown: CancellationToken) -> Result<()> {
    config.validate().context("invalid agent configuration")?;
    info!(
        "Starting ciwi agent {} (agent_id={}, server={})",
        version(),
        config.agent_id,
        config.server_url
    );

    tokio::fs::create_dir_all(config.jobs_dir())
        .await
        .with_context(|| format!("failed to create {}", config.jobs_dir().display()))?;
    tokio::fs::create_dir_all(config.cache_dir())
        .await
        .with_context(|| format!("failed to create {}", config.cache_dir().display()))?;

    let client = ServerClient::new(config.server_url.clone());
    let agents = Arc::new(HttpAgentRepository::new(client.clone()));
    let jobs = Arc::new(HttpJobRepository::new(client));

    let updater: Arc<dyn SelfUpdate> = Arc::new(ReleaseSelfUpdate::new(
        UpdateSettings::from_env(),
        version(),
        restart_args,
    ));

    let capabilities = StandardCapabilitiesService::new(updater.is_service_mode())
        .discover()
        .await;
    let mut keys: Vec<_> = capabilities.iter().collect();
    keys.sort();
    for (key, value) in keys {
        info!("  - {}={}", key, value);
    }

    let execution: Arc<dyn ExecutionService> = Arc::new(StandardExecutionService::new(
        config.clone(),
        jobs,
        shutdown.clone(),
    ));
    let control: Arc<dyn ControlService> =
        Arc::new(StandardControlService::new(config.clone(), updater));

    let poller = JobPoller::new(
        config,
        version(),
        capabilities,
        agents,
        execution,
        control,
        shutdown,
    );
    poller.run().await
}

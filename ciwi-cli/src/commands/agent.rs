use std::path::PathBuf;

use anyhow::Result;
use ciwi_agent::AgentConfig;
use clap::Args;
use tokio_util::sync::CancellationToken;

/// Agent flags; unset flags keep the environment/default value
#[derive(Args, Debug, Clone, Default)]
pub struct AgentArgs {
    /// Server base URL
    #[arg(long, env = "CIWI_SERVER_URL")]
    pub server_url: Option<String>,

    /// Agent identifier
    #[arg(long, env = "CIWI_AGENT_ID")]
    pub agent_id: Option<String>,

    /// Root for job workspaces and caches
    #[arg(long, env = "CIWI_AGENT_WORKDIR")]
    pub workdir: Option<PathBuf>,
}

impl AgentArgs {
    /// Applies the flags over `base`
    pub fn apply(self, mut base: AgentConfig) -> AgentConfig {
        if let Some(server_url) = self.server_url {
            base.server_url = server_url;
        }
        if let Some(agent_id) = self.agent_id {
            base.agent_id = agent_id;
        }
        if let Some(workdir) = self.workdir {
            base.workdir = workdir;
        }
        base
    }
}

pub async fn handle_agent_command(args: AgentArgs, shutdown: CancellationToken) -> Result<()> {
    let config = args.apply(AgentConfig::from_env()?);
    ciwi_agent::run(config, super::restart_args(), shutdown).await
}

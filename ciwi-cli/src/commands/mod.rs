//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod agent;
mod all_in_one;
mod server;
mod update_helper;

pub use agent::AgentArgs;
pub use server::ServerArgs;
pub use update_helper::UpdateHelperArgs;

use anyhow::Result;
use clap::Subcommand;
use tokio_util::sync::CancellationToken;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the scheduler and API server
    Server(ServerArgs),
    /// Run an execution agent
    Agent(AgentArgs),
    /// Run a server and a local agent in one process
    AllInOne {
        #[command(flatten)]
        server: ServerArgs,
        #[command(flatten)]
        agent: AgentArgs,
    },
    /// Swap in an updated binary (started by ciwi itself)
    UpdateHelper(UpdateHelperArgs),
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
///
/// # Arguments
/// * `command` - The command to execute
/// * `shutdown` - Cancelled on Ctrl-C or SIGTERM
pub async fn handle_command(command: Commands, shutdown: CancellationToken) -> Result<()> {
    match command {
        Commands::Server(args) => server::handle_server_command(args, shutdown).await,
        Commands::Agent(args) => agent::handle_agent_command(args, shutdown).await,
        Commands::AllInOne { server, agent } => {
            all_in_one::handle_all_in_one_command(server, agent, shutdown).await
        }
        Commands::UpdateHelper(args) => update_helper::handle_update_helper_command(args).await,
    }
}

/// Arguments a self-updated binary is relaunched with
pub(crate) fn restart_args() -> Vec<String> {
    std::env::args().skip(1).collect()
}

//! ciwi CLI
//!
//! Single binary for every ciwi role: the scheduler/API server, an execution
//! agent, both in one process, and the update helper.

mod commands;
mod config;

use std::process::ExitCode;

use clap::Parser;
use commands::{Commands, handle_command};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "ciwi")]
#[command(about = "ciwi continuous integration server and agent", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

fn main() -> ExitCode {
    // Bad invocations exit with 2 from clap
    let cli = Cli::parse();

    config::init_tracing();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("ciwi: failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = CancellationToken::new();
    runtime.spawn(wait_for_signal(shutdown.clone()));

    match runtime.block_on(handle_command(cli.command, shutdown)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("ciwi: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Cancels `shutdown` on Ctrl-C or SIGTERM
async fn wait_for_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("Shutdown requested");
    shutdown.cancel();
}

use std::path::PathBuf;

use anyhow::{Context, Result};
use ciwi_update::{HelperArgs, UpdateSettings};
use clap::Args;

/// Either a helper swap (`--target --new --pid [--arg]...`) or a staged
/// apply (`--manifest`)
#[derive(Args, Debug, Clone)]
pub struct UpdateHelperArgs {
    /// Binary to replace
    #[arg(long, required_unless_present = "manifest", conflicts_with = "manifest")]
    pub target: Option<PathBuf>,

    /// Verified new binary
    #[arg(long, required_unless_present = "manifest")]
    pub new: Option<PathBuf>,

    /// Process to wait for before swapping
    #[arg(long, required_unless_present = "manifest")]
    pub pid: Option<u32>,

    /// Argument to relaunch the target with (repeatable)
    #[arg(long = "arg", allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// Apply the staged update described by this manifest
    #[arg(long)]
    pub manifest: Option<PathBuf>,
}

impl UpdateHelperArgs {
    /// Helper arguments when this is a swap invocation
    fn helper_args(&self) -> Option<HelperArgs> {
        Some(HelperArgs {
            target: self.target.clone()?,
            new: self.new.clone()?,
            pid: self.pid?,
            args: self.args.clone(),
        })
    }
}

pub async fn handle_update_helper_command(args: UpdateHelperArgs) -> Result<()> {
    if let Some(manifest) = args.manifest.clone() {
        return tokio::task::spawn_blocking(move || apply_staged(manifest))
            .await
            .context("staged apply task failed")?;
    }

    let helper = args
        .helper_args()
        .context("update-helper needs --target, --new and --pid")?;
    tracing::info!(
        target = %helper.target.display(),
        pid = helper.pid,
        "Running update helper"
    );
    tokio::task::spawn_blocking(move || ciwi_update::helper::run_helper(&helper))
        .await
        .context("update helper task failed")?
        .context("update helper failed")
}

fn apply_staged(manifest: PathBuf) -> Result<()> {
    let settings = UpdateSettings::from_env();
    let service = ciwi_update::service::detect(&settings);
    match ciwi_update::manifest::apply_staged(&manifest, service.as_ref())
        .with_context(|| format!("failed to apply {}", manifest.display()))?
    {
        Some(applied) => tracing::info!(version = %applied.target_version, "Update applied"),
        None => tracing::info!("Nothing to apply"),
    }
    Ok(())
}

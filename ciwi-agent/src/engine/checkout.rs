//! Source checkout
//!
//! Shallow-clones the job's repository into the execution directory and,
//! when a ref is given, fetches and checks out exactly that ref. Transport
//! hiccups are retried, the later attempts forcing HTTP/1.1; authentication
//! failures are not.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use ciwi_core::domain::job::SourceSpec;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::process::{ProcessOutcome, ProcessSpec, run_process};
use crate::service::{InMemoryLogBuffer, LogBufferService};

/// Clone attempts before giving up on a transport error
pub const CHECKOUT_ATTEMPTS: u32 = 3;

const GIT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

const TRANSIENT_MARKERS: [&str; 12] = [
    "http/2 stream",
    "stream was not closed cleanly",
    "connection reset",
    "connection timed out",
    "operation timed out",
    "timed out",
    "early eof",
    "unexpected disconnect",
    "the remote end hung up unexpectedly",
    "rpc failed",
    "could not resolve host",
    "gnutls_handshake",
];

const AUTH_MARKERS: [&str; 6] = [
    "authentication failed",
    "permission denied",
    "could not read username",
    "could not read password",
    "access denied",
    "the requested url returned error: 403",
];

/// Git failure that will not go away by retrying
pub fn is_auth_failure(output: &str) -> bool {
    let lower = output.to_ascii_lowercase();
    AUTH_MARKERS.iter().any(|m| lower.contains(m))
}

/// Git failure caused by the network rather than the request
pub fn is_transient_failure(output: &str) -> bool {
    if is_auth_failure(output) {
        return false;
    }
    let lower = output.to_ascii_lowercase();
    TRANSIENT_MARKERS.iter().any(|m| lower.contains(m))
}

/// Git invocations for one attempt
pub fn checkout_commands(source: &SourceSpec, dir: &Path, http1: bool) -> Vec<ProcessSpec> {
    let dir = dir.to_string_lossy().to_string();
    let git = |args: &[&str]| {
        let mut spec = ProcessSpec::new("git");
        if http1 {
            spec = spec.args(["-c", "http.version=HTTP/1.1"]);
        }
        spec.args(args.iter().copied())
    };

    let mut commands = vec![git(&["clone", "--depth", "1", source.repo.trim(), dir.as_str()])];
    let git_ref = source.git_ref.trim();
    if !git_ref.is_empty() {
        commands.push(git(&["-C", dir.as_str(), "fetch", "--depth", "1", "origin", git_ref]));
        commands.push(git(&["-C", dir.as_str(), "checkout", "--force", "FETCH_HEAD"]));
    }
    for cmd in &mut commands {
        // Never wait for credentials on a terminal nobody watches
        cmd.env
            .insert("GIT_TERMINAL_PROMPT".to_string(), "0".to_string());
    }
    commands
}

/// Checks out `source` into `dir`, writing breadcrumbs into `output`
pub async fn checkout(
    source: &SourceSpec,
    dir: &Path,
    output: Arc<dyn LogBufferService>,
    cancel: &CancellationToken,
) -> Result<()> {
    if source.repo.trim().is_empty() {
        bail!("source repository is empty");
    }

    let mut last_error = String::new();
    for attempt in 1..=CHECKOUT_ATTEMPTS {
        let http1 = attempt > 1;
        output.line(&format!(
            "[checkout] cloning {} (attempt {}/{}{})",
            source.repo.trim(),
            attempt,
            CHECKOUT_ATTEMPTS,
            if http1 { ", http/1.1" } else { "" }
        ));

        clear_dir(dir).await?;
        match run_attempt(source, dir, Arc::clone(&output), cancel, http1).await? {
            AttemptResult::Done => {
                output.line("[checkout] done");
                info!(repo = %source.repo, "Checkout complete");
                return Ok(());
            }
            AttemptResult::Cancelled => bail!("checkout interrupted"),
            AttemptResult::Failed(text) => {
                if !is_transient_failure(&text) {
                    bail!("git checkout failed: {}", last_line(&text));
                }
                warn!(repo = %source.repo, attempt, "Transient checkout failure");
                output.line("[checkout] transient transport error, retrying");
                last_error = last_line(&text);
                tokio::time::sleep(Duration::from_secs(u64::from(attempt))).await;
            }
        }
    }
    bail!(
        "git checkout failed after {} attempts: {}",
        CHECKOUT_ATTEMPTS,
        last_error
    )
}

enum AttemptResult {
    Done,
    Cancelled,
    Failed(String),
}

async fn run_attempt(
    source: &SourceSpec,
    dir: &Path,
    output: Arc<dyn LogBufferService>,
    cancel: &CancellationToken,
    http1: bool,
) -> Result<AttemptResult> {
    let deadline = Instant::now() + GIT_TIMEOUT;
    for command in checkout_commands(source, dir, http1) {
        let captured = InMemoryLogBuffer::new();
        let outcome = run_process(
            &command,
            Arc::new(captured.clone()),
            cancel,
            Some(deadline),
        )
        .await?;
        let text = captured.snapshot();
        output.write(text.as_bytes());

        match outcome {
            ProcessOutcome::Exited(0) => {}
            ProcessOutcome::Cancelled => return Ok(AttemptResult::Cancelled),
            ProcessOutcome::TimedOut => {
                return Ok(AttemptResult::Failed("git operation timed out".to_string()));
            }
            ProcessOutcome::Exited(_) => return Ok(AttemptResult::Failed(text)),
        }
    }
    Ok(AttemptResult::Done)
}

/// Empties `dir` so `git clone` can write into it
async fn clear_dir(dir: &Path) -> Result<()> {
    if tokio::fs::try_exists(dir).await.unwrap_or(false) {
        tokio::fs::remove_dir_all(dir).await?;
    }
    tokio::fs::create_dir_all(dir).await?;
    Ok(())
}

fn last_line(text: &str) -> String {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("unknown error")
        .to_string()
}

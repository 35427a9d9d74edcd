//! Child process execution with cancellation
//!
//! Every command a job runs goes through [`run_process`]: output is copied
//! into the job's output buffer as it arrives, and cancellation or timeout
//! interrupts the whole process tree (SIGINT to the process group, then
//! SIGKILL after a grace period; `taskkill /T`, then `/F` on Windows).

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::service::LogBufferService;

/// Time between the interrupt and the forced kill
pub const KILL_GRACE: Duration = Duration::from_secs(2);

/// How long output readers may lag behind the process exit
const READER_DRAIN: Duration = Duration::from_secs(2);

/// A command to run
#[derive(Debug, Clone, Default)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    /// Start from an empty environment instead of the agent's
    pub clear_env: bool,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn envs(mut self, env: &HashMap<String, String>) -> Self {
        self.env
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Human readable command line for breadcrumbs
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        if self.clear_env {
            cmd.env_clear();
        }
        cmd.envs(&self.env);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }
}

/// How a process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Exited on its own; `-1` when killed by a signal
    Exited(i32),
    /// Interrupted because the job was cancelled
    Cancelled,
    /// Interrupted because the deadline passed
    TimedOut,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        matches!(self, ProcessOutcome::Exited(0))
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ProcessOutcome::Exited(code) => Some(*code),
            _ => None,
        }
    }
}

enum Stop {
    Cancelled,
    TimedOut,
}

/// Runs `spec` to completion, streaming its output into `output`
///
/// Returns an error only when the process cannot be started.
pub async fn run_process(
    spec: &ProcessSpec,
    output: Arc<dyn LogBufferService>,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
) -> Result<ProcessOutcome> {
    let mut child = spec
        .command()
        .spawn()
        .with_context(|| format!("failed to start {}", spec.program))?;

    debug!(program = %spec.program, pid = ?child.id(), "Process started");

    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_reader(stdout, Arc::clone(&output)));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_reader(stderr, Arc::clone(&output)));
    }

    let stop = tokio::select! {
        status = child.wait() => {
            let status = status.context("failed to wait for process")?;
            drain_readers(readers).await;
            return Ok(ProcessOutcome::Exited(status.code().unwrap_or(-1)));
        }
        _ = cancel.cancelled() => Stop::Cancelled,
        _ = wait_deadline(deadline) => Stop::TimedOut,
    };

    terminate_tree(&mut child).await;
    drain_readers(readers).await;

    Ok(match stop {
        Stop::Cancelled => ProcessOutcome::Cancelled,
        Stop::TimedOut => ProcessOutcome::TimedOut,
    })
}

/// Runs `spec` and captures its combined output instead of streaming it
pub async fn capture_output(
    spec: &ProcessSpec,
    timeout: Duration,
) -> Result<(ProcessOutcome, String)> {
    let buffer = crate::service::InMemoryLogBuffer::new();
    let sink: Arc<dyn LogBufferService> = Arc::new(buffer.clone());
    let outcome = run_process(
        spec,
        sink,
        &CancellationToken::new(),
        Some(Instant::now() + timeout),
    )
    .await?;
    Ok((outcome, buffer.snapshot()))
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn spawn_reader<R>(mut reader: R, output: Arc<dyn LogBufferService>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => output.write(&chunk[..n]),
                Err(e) => {
                    debug!("Output reader stopped: {}", e);
                    break;
                }
            }
        }
    })
}

/// Waits for readers; background grandchildren may keep pipes open forever
async fn drain_readers(readers: Vec<JoinHandle<()>>) {
    for mut reader in readers {
        if tokio::time::timeout(READER_DRAIN, &mut reader).await.is_err() {
            reader.abort();
        }
    }
}

/// Interrupts the process tree, escalating to a kill after [`KILL_GRACE`]
async fn terminate_tree(child: &mut Child) {
    let Some(pid) = child.id() else {
        return;
    };

    interrupt_tree(pid).await;
    if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_ok() {
        return;
    }

    warn!(pid, "Process ignored interrupt, killing");
    kill_tree(pid).await;
    if let Err(e) = child.kill().await {
        debug!(pid, "Final kill failed: {}", e);
    }
}

#[cfg(unix)]
async fn interrupt_tree(pid: u32) {
    signal_group(pid, nix::sys::signal::Signal::SIGINT);
}

#[cfg(unix)]
async fn kill_tree(pid: u32) {
    signal_group(pid, nix::sys::signal::Signal::SIGKILL);
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = nix::sys::signal::killpg(nix::unistd::Pid::from_raw(raw), signal) {
        debug!(pid, ?signal, "killpg failed: {}", e);
    }
}

#[cfg(not(unix))]
async fn interrupt_tree(pid: u32) {
    taskkill(pid, false).await;
}

#[cfg(not(unix))]
async fn kill_tree(pid: u32) {
    taskkill(pid, true).await;
}

#[cfg(not(unix))]
async fn taskkill(pid: u32, force: bool) {
    let mut cmd = Command::new("taskkill");
    cmd.arg("/PID").arg(pid.to_string()).arg("/T");
    if force {
        cmd.arg("/F");
    }
    if let Err(e) = cmd.output().await {
        debug!(pid, "taskkill failed: {}", e);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::service::InMemoryLogBuffer;

    fn sh(script: &str) -> ProcessSpec {
        ProcessSpec::new("sh").arg("-c").arg(script)
    }

    #[tokio::test]
    async fn test_exit_code_and_output() {
        let buffer = InMemoryLogBuffer::new();
        let outcome = run_process(
            &sh("echo out; echo err >&2; exit 3"),
            Arc::new(buffer.clone()),
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(outcome, ProcessOutcome::Exited(3));
        let text = buffer.snapshot();
        assert!(text.contains("out\n"));
        assert!(text.contains("err\n"));
    }

    #[tokio::test]
    async fn test_env_and_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = HashMap::new();
        env.insert("CIWI_TEST_VALUE".to_string(), "42".to_string());

        let (outcome, text) = capture_output(
            &sh("echo \"$CIWI_TEST_VALUE\"; pwd").cwd(dir.path()).envs(&env),
            Duration::from_secs(10),
        )
        .await
        .unwrap();

        assert!(outcome.success());
        assert!(text.starts_with("42\n"));
        let name = dir.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(text.contains(&name));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_process_group() {
        let buffer = InMemoryLogBuffer::new();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let outcome = run_process(
            &sh("sleep 30; echo never"),
            Arc::new(buffer),
            &cancel,
            None,
        )
        .await
        .unwrap();

        assert_eq!(outcome, ProcessOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_interrupt_escalates_to_kill() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let started = std::time::Instant::now();

        let outcome = run_process(
            &sh("trap '' INT; sleep 30"),
            Arc::new(InMemoryLogBuffer::new()),
            &cancel,
            None,
        )
        .await
        .unwrap();

        assert_eq!(outcome, ProcessOutcome::Cancelled);
        assert!(started.elapsed() >= KILL_GRACE);
        assert!(started.elapsed() < Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_deadline() {
        let outcome = run_process(
            &sh("sleep 30"),
            Arc::new(InMemoryLogBuffer::new()),
            &CancellationToken::new(),
            Some(Instant::now() + Duration::from_millis(100)),
        )
        .await
        .unwrap();
        assert_eq!(outcome, ProcessOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_missing_program_is_an_error() {
        let result = run_process(
            &ProcessSpec::new("ciwi-definitely-not-installed"),
            Arc::new(InMemoryLogBuffer::new()),
            &CancellationToken::new(),
            None,
        )
        .await;
        assert!(result.is_err());
    }
}

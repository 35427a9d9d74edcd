//! Execution service
//!
//! Runs one leased job end to end:
//! - Reports it running and prepares an isolated workspace
//! - Starts the control-plane watcher and the live output streamer
//! - Checks out sources, fetches dependency artifacts and resolves caches
//! - Starts the runtime container and validates probed tool versions
//! - Runs the script or step plan, parsing the reports of test steps
//! - Uploads artifacts and the test report, then reports the terminal status
//!
//! Failures of any phase end up in the job's terminal record, never in a
//! panic or an early return that would leave the job running on the server.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use crate::service::LogBufferService;
use chrono::Utc;
use ciwi_core::domain::job::{
    CoverageFormat, JobEvent, JobExecution, JobStatus, JobStepPlanItem, StepKind, TestReportFormat,
};
use ciwi_core::domain::metadata;
use ciwi_core::domain::test_report::JobTestReport;
use ciwi_core::dto::artifact::UploadTestReportRequest;
use ciwi_core::dto::job::StatusUpdate;
use ciwi_core::output::{prepare_output, redact};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AgentConfig;
use crate::context::JobContext;
use crate::engine::cache::{self, ResolvedCache};
use crate::engine::container::{ContainerSpec, RuntimeContainer};
use crate::engine::{
    ProcessOutcome, Shell, artifacts, checkout, deps, probe, reporter, run_process, streamer,
    watcher, workspace,
};
use crate::report;
use crate::repository::JobRepository;

/// Error recorded when a job exceeds its `timeout_seconds`
pub const TIMED_OUT: &str = "job timed out";

const PREPARING: &str = "Preparing execution";

/// Service trait for executing leased jobs
#[async_trait]
pub trait ExecutionService: Send + Sync {
    /// Executes `job` and reports its terminal status to the server
    ///
    /// Returns an error only when the terminal status could not be delivered
    /// or the server refused the job outright.
    async fn execute(&self, job: JobExecution) -> Result<JobOutcome>;
}

/// What the agent reported for a finished job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    pub error: String,
}

/// State accumulated while a job runs, kept for the publish and cleanup phases
#[derive(Default)]
struct JobRun {
    exec_dir: Option<PathBuf>,
    caches: Vec<ResolvedCache>,
    container: Option<RuntimeContainer>,
    runtime_capabilities: HashMap<String, String>,
    report: JobTestReport,
    exit_code: Option<i32>,
}

/// How scripts of this job are launched
struct ScriptRuntime<'a> {
    shell: Shell,
    trace: bool,
    exec_dir: &'a Path,
    env: HashMap<String, String>,
    container: Option<&'a RuntimeContainer>,
}

/// Standard implementation of ExecutionService
pub struct StandardExecutionService {
    config: AgentConfig,
    jobs: Arc<dyn JobRepository>,
    shutdown: CancellationToken,
}

impl StandardExecutionService {
    /// Creates a new execution service
    ///
    /// Jobs still running when `shutdown` is cancelled are interrupted and
    /// reported as failed.
    pub fn new(config: AgentConfig, jobs: Arc<dyn JobRepository>, shutdown: CancellationToken) -> Self {
        Self {
            config,
            jobs,
            shutdown,
        }
    }

    /// Workspace, checkout, dependencies, caches, container, probes, steps
    async fn run_job(&self, ctx: &Arc<JobContext>, run: &mut JobRun) -> Result<()> {
        let job = &ctx.job;

        let exec_dir = workspace::prepare(&self.config.jobs_dir(), job).await?;
        let exec_dir = std::path::absolute(&exec_dir)
            .with_context(|| format!("failed to resolve {}", exec_dir.display()))?;
        ctx.log(format!("[run] workspace {}", exec_dir.display()));
        run.exec_dir = Some(exec_dir.clone());

        if let Some(source) = job.source.as_ref().filter(|s| !s.repo.trim().is_empty()) {
            checkout::checkout(source, &exec_dir, ctx.sink(), &ctx.cancel).await?;
        }

        let dep_ids = deps::dependency_job_ids(&job.env);
        if !dep_ids.is_empty() {
            let written = deps::download_dependency_artifacts(
                self.jobs.as_ref(),
                &dep_ids,
                &exec_dir,
                &ctx.output,
            )
            .await?;
            ctx.log(format!("[deps] downloaded {written} file(s)"));
        }

        if !job.caches.is_empty() {
            let root = std::path::absolute(self.config.cache_dir())
                .context("failed to resolve cache directory")?;
            let specs = job.caches.clone();
            run.caches = tokio::task::spawn_blocking(move || cache::resolve_all(&root, &specs))
                .await
                .context("cache resolution task failed")??;
            for resolved in &run.caches {
                let mut line = format!(
                    "[cache] {}: {} at {}",
                    resolved.spec.id,
                    resolved.source.as_str(),
                    resolved.path.display()
                );
                if let Some(from) = &resolved.restored_from {
                    line.push_str(&format!(" (restored from {})", from.display()));
                }
                ctx.log(line);
            }
        }

        let mut env = job.env.clone();
        env.extend(cache::cache_env(&run.caches));
        if self.config.go_build_verbose {
            append_go_flag(&mut env, "-v");
        }

        let mounts = run.caches.iter().map(|c| c.path.clone()).collect();
        if let Some(spec) = ContainerSpec::from_job(job, &exec_dir, mounts) {
            ctx.log(format!("[runtime] starting container from {}", spec.image));
            let container = RuntimeContainer::start(&spec, &job.id).await?;
            ctx.log(format!(
                "[runtime] container {} running, workdir {}",
                container.name(),
                container.workdir()
            ));
            run.container = Some(container);
        }

        let shell = Shell::resolve(&job.required_capabilities)?;
        let mut host_env = self.config.extra_env.clone();
        host_env.extend(env.clone());

        let (host_tools, container_tools) = probe::required_tools(&job.required_capabilities);
        if !host_tools.is_empty() {
            let found = probe::probe_host_tools(shell, &host_tools, &host_env, &exec_dir).await;
            run.runtime_capabilities.extend(found);
        }
        if let Some(container) = &run.container
            && !container_tools.is_empty()
        {
            let found = probe::probe_container_tools(container, &container_tools).await;
            run.runtime_capabilities.extend(found);
        }
        let mut probed: Vec<_> = run.runtime_capabilities.iter().collect();
        probed.sort();
        for (key, version) in probed {
            ctx.log(format!("[runtime] {key}={version}"));
        }

        let unmet =
            probe::unmet_runtime_requirements(&job.required_capabilities, &run.runtime_capabilities);
        if !unmet.is_empty() {
            for reason in &unmet {
                ctx.log(format!("[runtime] {reason}"));
            }
            bail!("runtime requirements not met: {}", unmet.join("; "));
        }

        let runtime = ScriptRuntime {
            shell,
            trace: self.trace_enabled(job),
            exec_dir: &exec_dir,
            env: if run.container.is_some() { env } else { host_env },
            container: run.container.as_ref(),
        };

        if job.step_plan.is_empty() {
            ctx.set_current_step("");
            let outcome = self.run_script(ctx, &runtime, &job.script, &HashMap::new()).await?;
            return check_outcome(ctx, outcome, &mut run.exit_code);
        }

        let total = job.step_plan.len();
        for (i, step) in job.step_plan.iter().enumerate() {
            let index = i + 1;
            let label = format!("Step {index}/{total}: {}", step.name);
            ctx.set_current_step(&label);
            ctx.log(format!("[step] {label}"));
            self.post_event(ctx, JobEvent::new("step.started").for_step(index, &step.name))
                .await;

            if step.kind == StepKind::DryrunSkip {
                ctx.log(format!("[step] {} skipped (dry run)", step.name));
                self.post_event(
                    ctx,
                    JobEvent::new("step.skipped")
                        .for_step(index, &step.name)
                        .with_message("dry run"),
                )
                .await;
                continue;
            }

            let outcome = self.run_script(ctx, &runtime, &step.script, &step.env).await?;
            let result = check_outcome(ctx, outcome, &mut run.exit_code);
            if step.kind == StepKind::Test && !ctx.is_cancelled() {
                collect_step_reports(ctx, step, &exec_dir, &mut run.report).await;
            }

            match result {
                Ok(()) => {
                    self.post_event(ctx, JobEvent::new("step.finished").for_step(index, &step.name))
                        .await;
                }
                Err(e) => {
                    ctx.log(format!("[run] step failed: {} ({e})", step.name));
                    self.post_event(
                        ctx,
                        JobEvent::new("step.failed")
                            .for_step(index, &step.name)
                            .with_message(redact(&e.to_string(), &job.sensitive_values)),
                    )
                    .await;
                    return Err(e.context(format!("step {} failed", step.name)));
                }
            }
        }
        Ok(())
    }

    async fn run_script(
        &self,
        ctx: &JobContext,
        runtime: &ScriptRuntime<'_>,
        script: &str,
        overlay: &HashMap<String, String>,
    ) -> Result<ProcessOutcome> {
        let body = runtime.shell.build_script(script, runtime.trace);
        let mut env = runtime.env.clone();
        env.extend(overlay.iter().map(|(k, v)| (k.clone(), v.clone())));

        let spec = match runtime.container {
            Some(container) => container.exec_command(runtime.shell, &body, &env),
            None => runtime
                .shell
                .host_command(&body, runtime.exec_dir)
                .await?
                .cwd(runtime.exec_dir)
                .envs(&env),
        };
        debug!(job_id = %ctx.job.id, command = %spec.display(), "Running script");
        run_process(&spec, ctx.sink(), &ctx.cancel, None).await
    }

    /// Tracing is off for jobs carrying secrets and for ad-hoc scripts
    fn trace_enabled(&self, job: &JobExecution) -> bool {
        self.config.trace_shell
            && job.meta(metadata::HAS_SECRETS) != "1"
            && job.meta(metadata::ADHOC) != "1"
            && job.meta(metadata::ADHOC_AGENT_ID).is_empty()
    }

    async fn post_event(&self, ctx: &JobContext, event: JobEvent) {
        let mut update = StatusUpdate::new(&ctx.agent_id, JobStatus::Running);
        update.current_step = ctx.current_step();
        update.events = vec![event];
        update.timestamp_utc = Some(Utc::now());
        if let Err(e) = self.jobs.update_status(&ctx.job.id, &update).await {
            debug!(job_id = %ctx.job.id, "Step event update failed: {}", e);
        }
    }

    async fn publish_artifacts(&self, ctx: &JobContext, exec_dir: &Path) -> Result<()> {
        if ctx.job.artifact_globs.is_empty() {
            return Ok(());
        }
        let root = exec_dir.to_path_buf();
        let globs = ctx.job.artifact_globs.clone();
        let output = ctx.output.clone();
        let collected =
            tokio::task::spawn_blocking(move || artifacts::collect(&root, &globs, &output))
                .await
                .context("artifact collection task failed")??;

        if collected.is_empty() {
            ctx.log("[artifacts] no files matched");
            return Ok(());
        }
        let bytes: u64 = collected.iter().map(|a| a.size).sum();
        ctx.log(format!(
            "[artifacts] uploading {} file(s), {} bytes",
            collected.len(),
            bytes
        ));
        artifacts::upload(self.jobs.as_ref(), &ctx.job.id, &ctx.agent_id, &collected).await?;
        ctx.log("[artifacts] uploaded");
        Ok(())
    }

    async fn publish_test_report(&self, ctx: &JobContext, report: &JobTestReport) -> Result<()> {
        let req = UploadTestReportRequest {
            agent_id: ctx.agent_id.clone(),
            report: report.clone(),
        };
        self.jobs
            .upload_test_report(&ctx.job.id, &req)
            .await
            .context("test report upload failed")?;
        ctx.log(format!(
            "[tests] report uploaded: {} total, {} passed, {} failed, {} skipped",
            report.total, report.passed, report.failed, report.skipped
        ));
        Ok(())
    }

    async fn terminal_update(
        &self,
        ctx: &JobContext,
        run: &JobRun,
        error: Option<&str>,
    ) -> StatusUpdate {
        let status = match error {
            None => JobStatus::Succeeded,
            Some(_) => JobStatus::Failed,
        };
        let mut update = StatusUpdate::new(&ctx.agent_id, status);
        update.exit_code = match status {
            JobStatus::Succeeded => Some(run.exit_code.unwrap_or(0)),
            _ => run.exit_code,
        };
        update.error = error
            .map(|e| redact(e, &ctx.job.sensitive_values))
            .unwrap_or_default();
        update.output = prepare_output(&ctx.output.snapshot(), &ctx.job.sensitive_values);
        update.runtime_capabilities = run.runtime_capabilities.clone();
        update.timestamp_utc = Some(Utc::now());

        for resolved in &run.caches {
            let mut stats = cache::cache_stats(resolved);
            if cache::is_ccache(&resolved.spec) {
                stats.tool_metrics = cache::ccache_metrics(&resolved.path).await;
            }
            update.cache_stats.push(stats);
        }
        update
    }

    async fn cleanup(&self, run: &mut JobRun) {
        if let Some(container) = run.container.take() {
            container.remove().await;
        }

        for resolved in &run.caches {
            if resolved.spec.policy.trim().eq_ignore_ascii_case("pull") {
                continue;
            }
            if resolved.spec.ttl_days <= 0 && resolved.spec.max_size_mb <= 0 {
                continue;
            }
            let keep = resolved.path.clone();
            let (ttl, max) = (resolved.spec.ttl_days, resolved.spec.max_size_mb);
            match tokio::task::spawn_blocking(move || cache::prune(&keep, ttl, max)).await {
                Ok(evicted) if !evicted.is_empty() => {
                    info!(cache = %resolved.spec.id, evicted = evicted.len(), "Pruned cache entries");
                }
                Ok(_) => {}
                Err(e) => warn!(cache = %resolved.spec.id, "Cache prune task failed: {}", e),
            }
        }
    }

    /// Cancels the job on timeout or agent shutdown, whichever comes first
    fn spawn_limits(&self, ctx: &Arc<JobContext>) -> JoinHandle<()> {
        let ctx = Arc::clone(ctx);
        let shutdown = self.shutdown.clone();
        let timeout = u64::try_from(ctx.job.timeout_seconds)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        tokio::spawn(async move {
            let expired = async {
                match timeout {
                    Some(timeout) => tokio::time::sleep(timeout).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                _ = ctx.cancel.cancelled() => {}
                _ = expired => {
                    warn!(job_id = %ctx.job.id, "Job timed out");
                    ctx.log(format!("[control] {TIMED_OUT}"));
                    ctx.cancel_with(TIMED_OUT);
                }
                _ = shutdown.cancelled() => {
                    ctx.log("[control] agent shutting down");
                    ctx.cancel_with("agent shutting down");
                }
            }
        })
    }
}

#[async_trait]
impl ExecutionService for StandardExecutionService {
    async fn execute(&self, job: JobExecution) -> Result<JobOutcome> {
        let ctx = Arc::new(JobContext::new(job, &self.config.agent_id));
        let job_id = ctx.job.id.clone();
        info!(job_id = %job_id, steps = ctx.job.step_plan.len(), "Executing job");

        let mut preparing = StatusUpdate::new(&ctx.agent_id, JobStatus::Running);
        preparing.current_step = PREPARING.to_string();
        preparing.timestamp_utc = Some(Utc::now());
        if let Err(e) = self.jobs.update_status(&job_id, &preparing).await {
            if e.is_client_error() {
                return Err(anyhow!("server refused job {job_id}: {e}"));
            }
            warn!(job_id = %job_id, "Failed to report running status: {}", e);
        }
        ctx.set_current_step(PREPARING);

        let stop = CancellationToken::new();
        let watcher = watcher::spawn_watcher(
            Arc::clone(&ctx),
            Arc::clone(&self.jobs),
            self.config.watch_interval,
            stop.clone(),
        );
        let streamer = streamer::spawn_streamer(
            Arc::clone(&ctx),
            Arc::clone(&self.jobs),
            self.config.stream_interval,
            stop.clone(),
        );
        let limits = self.spawn_limits(&ctx);

        let mut run = JobRun::default();
        let mut error = self
            .run_job(&ctx, &mut run)
            .await
            .err()
            .map(|e| format!("{e:#}"));
        if ctx.is_cancelled() {
            error = Some(ctx.cancel_reason().unwrap_or_else(|| "job cancelled".to_string()));
        }
        if let Some(e) = &error {
            ctx.log(format!("[run] {e}"));
        }

        if !ctx.is_cancelled()
            && let Some(exec_dir) = run.exec_dir.clone()
            && let Err(e) = self.publish_artifacts(&ctx, &exec_dir).await
        {
            ctx.log(format!("[artifacts] {e:#}"));
            error.get_or_insert_with(|| format!("{e:#}"));
        }

        if !run.report.is_empty() {
            match self.publish_test_report(&ctx, &run.report).await {
                Ok(()) if run.report.failed > 0 => {
                    error.get_or_insert_with(|| "test report contains failures".to_string());
                }
                Ok(()) => {}
                Err(e) => ctx.log(format!("[tests] {e:#}")),
            }
        }

        limits.abort();
        stop.cancel();
        for (name, handle) in [("watcher", watcher), ("streamer", streamer)] {
            if let Err(e) = handle.await {
                warn!(job_id = %job_id, "Job {} task panicked: {}", name, e);
            }
        }

        let update = self.terminal_update(&ctx, &run, error.as_deref()).await;
        let outcome = JobOutcome {
            status: update.status,
            exit_code: update.exit_code,
            error: update.error.clone(),
        };
        let delivered = reporter::report_terminal(self.jobs.as_ref(), &job_id, &update).await;

        self.cleanup(&mut run).await;

        match delivered {
            Ok(()) => {
                info!(job_id = %job_id, status = %outcome.status, "Job finished");
                Ok(outcome)
            }
            Err(e) => {
                error!(job_id = %job_id, "Terminal status lost: {:#}", e);
                Err(e)
            }
        }
    }
}

/// Maps a process outcome to the step result, recording the exit code
fn check_outcome(ctx: &JobContext, outcome: ProcessOutcome, exit_code: &mut Option<i32>) -> Result<()> {
    match outcome {
        ProcessOutcome::Exited(0) => {
            *exit_code = Some(0);
            Ok(())
        }
        ProcessOutcome::Exited(code) => {
            *exit_code = Some(code);
            bail!("exit status {code}")
        }
        ProcessOutcome::Cancelled => {
            bail!("{}", ctx.cancel_reason().unwrap_or_else(|| "job cancelled".to_string()))
        }
        ProcessOutcome::TimedOut => bail!(TIMED_OUT),
    }
}

/// Parses the test and coverage reports a test step declares
///
/// A missing or malformed report is noted in the output; the step result
/// alone decides whether the step failed.
async fn collect_step_reports(
    ctx: &JobContext,
    step: &JobStepPlanItem,
    exec_dir: &Path,
    report: &mut JobTestReport,
) {
    if let Some(rel) = step.test_report_path.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        let format = step.test_report_format.unwrap_or(if rel.ends_with(".xml") {
            TestReportFormat::JunitXml
        } else {
            TestReportFormat::GoTestJson
        });
        match workspace::safe_join(exec_dir, rel) {
            None => ctx.log(format!("[tests] skipping unsafe report path {rel}")),
            Some(path) => {
                match report::collect_test_report(&path, format, &step.name, report).await {
                    Ok(suite) => ctx.log(format!(
                        "[tests] {}: {} total, {} passed, {} failed, {} skipped",
                        step.name, suite.total, suite.passed, suite.failed, suite.skipped
                    )),
                    Err(e) => ctx.log(format!("[tests] {e:#}")),
                }
            }
        }
    }

    if let Some(rel) = step
        .coverage_report_path
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
    {
        let format = step.coverage_report_format.unwrap_or(
            if rel.ends_with(".info") || rel.contains("lcov") {
                CoverageFormat::Lcov
            } else {
                CoverageFormat::GoCoverprofile
            },
        );
        match workspace::safe_join(exec_dir, rel) {
            None => ctx.log(format!("[tests] skipping unsafe coverage path {rel}")),
            Some(path) => match report::collect_coverage(&path, format, report).await {
                Ok(()) => {
                    if let Some(coverage) = &report.coverage {
                        ctx.log(format!(
                            "[tests] coverage {:.2}% ({}/{} statements)",
                            coverage.percent,
                            coverage.covered_statements,
                            coverage.total_statements
                        ));
                    }
                }
                Err(e) => ctx.log(format!("[tests] {e:#}")),
            },
        }
    }
}

/// Appends `flag` to GOFLAGS unless it is already there
fn append_go_flag(env: &mut HashMap<String, String>, flag: &str) {
    let current = env.get("GOFLAGS").map(|f| f.trim().to_string()).unwrap_or_default();
    if current.split_whitespace().any(|f| f == flag) {
        return;
    }
    let next = if current.is_empty() {
        flag.to_string()
    } else {
        format!("{current} {flag}")
    };
    env.insert("GOFLAGS".to_string(), next);
}

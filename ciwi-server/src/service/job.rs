//! Job Service
//!
//! Business logic for the job execution lifecycle: enqueue, capability
//! matched leasing, the sticky-terminal status reducer, dependency gates and
//! queue administration.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use ciwi_core::capability::{capabilities_match, explain_unmet};
use ciwi_core::domain::job::{JobEvent, JobExecution, JobStatus};
use ciwi_core::domain::metadata;
use ciwi_core::dto::agent::LeaseRequest;
use ciwi_core::dto::job::{CreateJobExecution, StatusUpdate};
use ciwi_core::output::prepare_output;
use sqlx::SqlitePool;
use thiserror::Error;

use crate::db::retry_busy;
use crate::repository::job::{DeleteOutcome, MapColumn};
use crate::repository::job_repository;
use crate::service::agent::AgentRegistry;

/// Service error type
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job {0} not found")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

static LAST_JOB_NANOS: AtomicI64 = AtomicI64::new(0);

/// Mint a unique, monotonically increasing job id
///
/// Ids are `job-<unix nanos>`; two ids minted in the same nanosecond are
/// bumped apart.
pub fn mint_job_id() -> String {
    let now = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let mut last = LAST_JOB_NANOS.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_JOB_NANOS.compare_exchange_weak(last, next, Ordering::SeqCst, Ordering::Relaxed) {
            Ok(_) => return format!("job-{next}"),
            Err(current) => last = current,
        }
    }
}

// =============================================================================
// Queue
// =============================================================================

/// Validate and insert a new queued job execution
pub async fn enqueue(pool: &SqlitePool, req: CreateJobExecution) -> Result<JobExecution, JobError> {
    validate_create(&req)?;

    let job = JobExecution {
        id: mint_job_id(),
        script: req.script,
        step_plan: req.step_plan,
        env: req.env,
        required_capabilities: req.required_capabilities,
        timeout_seconds: req.timeout_seconds,
        source: req.source.filter(|s| !s.repo.trim().is_empty()),
        artifact_globs: req.artifact_globs,
        caches: req.caches,
        metadata: req.metadata,
        sensitive_values: req.sensitive_values,
        status: JobStatus::Queued,
        created_utc: Utc::now(),
        ..Default::default()
    };

    job_repository::insert(pool, &job).await?;
    tracing::info!(job_id = %job.id, "Job execution queued");

    Ok(job)
}

/// Get a job by ID
pub async fn get_job(pool: &SqlitePool, id: &str) -> Result<JobExecution, JobError> {
    job_repository::find_by_id(pool, id)
        .await?
        .ok_or_else(|| JobError::NotFound(id.to_string()))
}

/// List all jobs: pending first (oldest first), then history (newest first)
pub async fn list_jobs(pool: &SqlitePool) -> Result<Vec<JobExecution>, JobError> {
    let all = job_repository::list_all(pool).await?;
    let (mut pending, history): (Vec<_>, Vec<_>) =
        all.into_iter().partition(|j| !j.status.is_terminal());
    pending.reverse();
    pending.extend(history);
    Ok(pending)
}

/// Events recorded for a job
pub async fn list_events(pool: &SqlitePool, id: &str) -> Result<Vec<JobEvent>, JobError> {
    get_job(pool, id).await?;
    Ok(job_repository::list_events(pool, id).await?)
}

/// Lease the first queued job the agent can run
///
/// Walks the queue in FIFO order. Losing the conditional update to another
/// agent moves on to the next candidate.
pub async fn lease(
    pool: &SqlitePool,
    agents: &AgentRegistry,
    req: &LeaseRequest,
) -> Result<Option<JobExecution>, JobError> {
    let agent_id = req.agent_id.trim();
    if agent_id.is_empty() {
        return Err(JobError::Validation("agent_id is required".to_string()));
    }

    let caps = agents.scheduling_capabilities(agent_id, &req.capabilities);

    for job in job_repository::list_queued(pool).await? {
        let pinned = job.meta(metadata::ADHOC_AGENT_ID);
        if !pinned.is_empty() && pinned != agent_id {
            continue;
        }
        if !capabilities_match(&caps, &job.required_capabilities) {
            continue;
        }

        if job_repository::try_lease(pool, &job.id, agent_id, Utc::now()).await? {
            tracing::info!(job_id = %job.id, agent_id = %agent_id, "Job leased");
            return Ok(job_repository::find_by_id(pool, &job.id).await?);
        }
        tracing::debug!(job_id = %job.id, agent_id = %agent_id, "Lease race lost");
    }

    Ok(None)
}

/// Reasons no connected agent can run a queued job
pub async fn unmet_requirements(
    pool: &SqlitePool,
    agents: &AgentRegistry,
    id: &str,
) -> Result<Vec<String>, JobError> {
    let job = get_job(pool, id).await?;
    if job.status != JobStatus::Queued {
        return Ok(Vec::new());
    }

    let mut candidates = agents.list();
    let pinned = job.meta(metadata::ADHOC_AGENT_ID);
    if !pinned.is_empty() {
        candidates.retain(|a| a.agent_id == pinned);
    }

    Ok(explain_unmet(&candidates, &job.required_capabilities))
}

// =============================================================================
// Status Reducer
// =============================================================================

/// Apply a status update to one job
///
/// Returns the stored snapshot after the update. Updates against a terminal
/// job are no-ops that return the current snapshot.
pub async fn update_status(
    pool: &SqlitePool,
    id: &str,
    update: StatusUpdate,
) -> Result<JobExecution, JobError> {
    let current = get_job(pool, id).await?;

    let Some(next) = reduce(&current, &update, Utc::now())? else {
        tracing::debug!(job_id = %id, status = %update.status, "Ignoring update for terminal job");
        return Ok(current);
    };

    let written = retry_busy(|| write_reduced(pool, &current, &next, &update.events)).await?;
    if !written {
        let latest = get_job(pool, id).await?;
        if !latest.status.is_terminal() && latest.leased_by_agent_id != update.agent_id {
            tracing::warn!(
                job_id = %id,
                agent_id = %update.agent_id,
                leased_by = %latest.leased_by_agent_id,
                "Discarding update from a lost lease"
            );
            return Err(JobError::Conflict(format!(
                "job {id} is leased by another agent"
            )));
        }
        tracing::debug!(job_id = %id, "Job changed concurrently");
        return Ok(latest);
    }

    if next.status.is_terminal() {
        tracing::info!(
            job_id = %id,
            agent_id = %update.agent_id,
            status = %next.status,
            exit_code = ?next.exit_code,
            "Job finished"
        );
        // The update is committed; the sweeper retries the gates
        if let Err(e) = resolve_dependency_gates(pool).await {
            tracing::warn!(job_id = %id, "Failed to resolve dependency gates: {}", e);
        }
    }

    Ok(next)
}

/// Compute the job that results from `update`
///
/// `Ok(None)` means the update is discarded because the job is already
/// terminal.
pub fn reduce(
    current: &JobExecution,
    update: &StatusUpdate,
    now: DateTime<Utc>,
) -> Result<Option<JobExecution>, JobError> {
    if current.status.is_terminal() {
        return Ok(None);
    }

    if matches!(update.status, JobStatus::Queued | JobStatus::Leased) {
        return Err(JobError::Validation(format!(
            "invalid status update: {}",
            update.status
        )));
    }

    if !current.leased_by_agent_id.is_empty() && update.agent_id != current.leased_by_agent_id {
        return Err(JobError::Conflict(format!(
            "job {} is leased by another agent",
            current.id
        )));
    }

    if current.status == JobStatus::Queued && update.status == JobStatus::Running {
        return Err(JobError::Conflict(format!("job {} is not leased", current.id)));
    }

    let ts = update.timestamp_utc.unwrap_or(now);
    let mut next = current.clone();
    next.status = update.status;

    if !update.output.is_empty() {
        next.output = prepare_output(&update.output, &current.sensitive_values);
    }
    if !update.current_step.is_empty() {
        next.current_step = update.current_step.clone();
    }
    if !update.cache_stats.is_empty() {
        next.cache_stats = update.cache_stats.clone();
    }
    if !update.runtime_capabilities.is_empty() {
        next.runtime_capabilities = update.runtime_capabilities.clone();
    }
    if update.exit_code.is_some() {
        next.exit_code = update.exit_code;
    }
    next.error = if update.status == JobStatus::Succeeded {
        String::new()
    } else {
        update.error.clone()
    };

    if update.status == JobStatus::Running {
        next.started_utc = current.started_utc.or(Some(ts));
    } else {
        next.started_utc = current.started_utc.or(Some(ts));
        next.finished_utc = Some(ts);
        next.current_step.clear();
    }

    Ok(Some(next))
}

async fn write_reduced(
    pool: &SqlitePool,
    current: &JobExecution,
    next: &JobExecution,
    events: &[JobEvent],
) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    if job_repository::write_status(&mut *tx, current, next).await? == 0 {
        return Ok(false);
    }
    job_repository::insert_events(&mut *tx, &next.id, events).await?;

    tx.commit().await?;
    Ok(true)
}

// =============================================================================
// Dependency Gates
// =============================================================================

/// Unblock or fail queued jobs whose `needs` have settled
///
/// A job whose needed executions all succeeded gets
/// `CIWI_DEP_ARTIFACT_JOB_IDS` and loses its gate; a job with a failed or
/// vanished dependency is failed. Returns the number of jobs changed.
pub async fn resolve_dependency_gates(pool: &SqlitePool) -> Result<usize, JobError> {
    let mut changed = 0;

    for job in job_repository::list_blocked(pool).await? {
        if job.meta(metadata::NEEDS_BLOCKED) != "1" {
            continue;
        }
        let needed = split_ids(job.meta(metadata::NEEDS_JOB_IDS));

        match gate_state(pool, &needed).await? {
            GateState::Waiting => {}
            GateState::Failed(reason) => {
                if job_repository::fail_queued(pool, &job.id, &reason, Utc::now()).await? {
                    tracing::info!(job_id = %job.id, "{}", reason);
                    changed += 1;
                }
            }
            GateState::Ready => {
                let mut env = HashMap::from([(
                    metadata::DEP_ARTIFACT_JOB_IDS_ENV.to_string(),
                    needed.join(","),
                )]);
                if let [single] = needed.as_slice() {
                    env.insert(metadata::DEP_ARTIFACT_JOB_ID_ENV.to_string(), single.clone());
                }
                job_repository::merge_map(pool, &job.id, MapColumn::Env, &env).await?;

                let gate = HashMap::from([(metadata::NEEDS_BLOCKED.to_string(), String::new())]);
                job_repository::merge_map(pool, &job.id, MapColumn::Metadata, &gate).await?;
                tracing::info!(job_id = %job.id, "Dependencies satisfied, job unblocked");
                changed += 1;
            }
        }
    }

    Ok(changed)
}

enum GateState {
    Waiting,
    Ready,
    Failed(String),
}

async fn gate_state(pool: &SqlitePool, needed: &[String]) -> Result<GateState, JobError> {
    let mut waiting = false;
    for id in needed {
        match job_repository::find_by_id(pool, id).await? {
            None => return Ok(GateState::Failed(format!("dependency {id} no longer exists"))),
            Some(dep) if dep.status == JobStatus::Failed => {
                return Ok(GateState::Failed(format!("dependency {id} failed")));
            }
            Some(dep) if dep.status == JobStatus::Succeeded => {}
            Some(_) => waiting = true,
        }
    }
    Ok(if waiting { GateState::Waiting } else { GateState::Ready })
}

fn split_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Clear the chain/needs gates of a job by hand
pub async fn unblock(pool: &SqlitePool, id: &str) -> Result<JobExecution, JobError> {
    let patch = HashMap::from([
        (metadata::CHAIN_BLOCKED.to_string(), String::new()),
        (metadata::NEEDS_BLOCKED.to_string(), String::new()),
    ]);
    merge_metadata(pool, id, &patch).await?;
    tracing::info!(job_id = %id, "Job unblocked");
    get_job(pool, id).await
}

/// Merge an env patch into a job
pub async fn merge_env(
    pool: &SqlitePool,
    id: &str,
    patch: &HashMap<String, String>,
) -> Result<(), JobError> {
    if !job_repository::merge_map(pool, id, MapColumn::Env, patch).await? {
        return Err(JobError::NotFound(id.to_string()));
    }
    Ok(())
}

/// Merge a metadata patch into a job
pub async fn merge_metadata(
    pool: &SqlitePool,
    id: &str,
    patch: &HashMap<String, String>,
) -> Result<(), JobError> {
    if !job_repository::merge_map(pool, id, MapColumn::Metadata, patch).await? {
        return Err(JobError::NotFound(id.to_string()));
    }
    Ok(())
}

// =============================================================================
// Queue Administration
// =============================================================================

/// Delete a queued or leased job
pub async fn delete_pending(pool: &SqlitePool, id: &str) -> Result<(), JobError> {
    match job_repository::delete_pending(pool, id).await? {
        DeleteOutcome::Deleted => {
            tracing::info!(job_id = %id, "Job deleted");
            Ok(())
        }
        DeleteOutcome::NotFound => Err(JobError::NotFound(id.to_string())),
        DeleteOutcome::NotPending(status) => Err(JobError::Conflict(format!(
            "job {id} is {status} and cannot be deleted"
        ))),
    }
}

/// Delete every queued and leased job
pub async fn clear_queue(pool: &SqlitePool) -> Result<u64, JobError> {
    let affected = job_repository::clear_queue(pool).await?;
    tracing::info!(affected, "Queue cleared");
    Ok(affected)
}

/// Delete every terminal job
pub async fn flush_history(pool: &SqlitePool) -> Result<u64, JobError> {
    let affected = job_repository::flush_history(pool).await?;
    tracing::info!(affected, "Job history flushed");
    Ok(affected)
}

/// Delete the terminal jobs one agent executed
pub async fn flush_agent_history(pool: &SqlitePool, agent_id: &str) -> Result<u64, JobError> {
    if agent_id.trim().is_empty() {
        return Err(JobError::Validation("agent_id is required".to_string()));
    }
    let affected = job_repository::flush_agent_history(pool, agent_id).await?;
    tracing::info!(agent_id = %agent_id, affected, "Agent job history flushed");
    Ok(affected)
}

// =============================================================================
// Validation
// =============================================================================

fn validate_create(req: &CreateJobExecution) -> Result<(), JobError> {
    if req.script.trim().is_empty() && req.step_plan.is_empty() {
        return Err(JobError::Validation("script is required".to_string()));
    }

    if req.timeout_seconds < 0 {
        return Err(JobError::Validation(
            "timeout_seconds must be >= 0".to_string(),
        ));
    }

    if req.step_plan.iter().any(|s| s.name.trim().is_empty()) {
        return Err(JobError::Validation("every step needs a name".to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::temp_pool;
    use ciwi_core::dto::agent::HeartbeatRequest;
    use std::sync::Arc;

    fn create(script: &str) -> CreateJobExecution {
        CreateJobExecution {
            script: script.to_string(),
            ..Default::default()
        }
    }

    fn status(agent: &str, status: JobStatus) -> StatusUpdate {
        StatusUpdate::new(agent, status)
    }

    async fn leased_job(pool: &SqlitePool, agent: &str) -> JobExecution {
        let job = enqueue(pool, create("make")).await.unwrap();
        assert!(job_repository::try_lease(pool, &job.id, agent, Utc::now()).await.unwrap());
        get_job(pool, &job.id).await.unwrap()
    }

    fn registry_with(agent: &str, caps: &[(&str, &str)]) -> AgentRegistry {
        let registry = AgentRegistry::new();
        registry
            .heartbeat(HeartbeatRequest {
                agent_id: agent.to_string(),
                capabilities: caps
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                ..Default::default()
            })
            .unwrap();
        registry
    }

    #[test]
    fn test_mint_job_id_is_monotonic() {
        let a = mint_job_id();
        let b = mint_job_id();
        let parse = |id: &str| id.trim_start_matches("job-").parse::<i64>().unwrap();
        assert!(parse(&b) > parse(&a));
    }

    #[test]
    fn test_validate_create() {
        assert!(validate_create(&create("echo")).is_ok());
        assert!(matches!(
            validate_create(&create("  ")),
            Err(JobError::Validation(_))
        ));
        let mut negative = create("echo");
        negative.timeout_seconds = -1;
        assert!(matches!(
            validate_create(&negative),
            Err(JobError::Validation(_))
        ));
    }

    #[test]
    fn test_reduce_rejects_foreign_agent() {
        let current = JobExecution {
            id: "job-1".to_string(),
            status: JobStatus::Running,
            leased_by_agent_id: "agent-a".to_string(),
            ..Default::default()
        };
        let result = reduce(&current, &status("agent-b", JobStatus::Running), Utc::now());
        assert!(matches!(result, Err(JobError::Conflict(_))));
    }

    #[test]
    fn test_reduce_terminal_clears_step_and_sets_finish() {
        let started = Utc::now() - chrono::Duration::seconds(30);
        let current = JobExecution {
            id: "job-1".to_string(),
            status: JobStatus::Running,
            leased_by_agent_id: "agent-a".to_string(),
            started_utc: Some(started),
            current_step: "Step 1/2: build".to_string(),
            error: "old".to_string(),
            ..Default::default()
        };
        let mut update = status("agent-a", JobStatus::Succeeded);
        update.exit_code = Some(0);
        update.error = "ignored".to_string();

        let next = reduce(&current, &update, Utc::now()).unwrap().unwrap();
        assert_eq!(next.status, JobStatus::Succeeded);
        assert_eq!(next.started_utc, Some(started));
        assert!(next.finished_utc.is_some());
        assert_eq!(next.current_step, "");
        assert_eq!(next.error, "");
    }

    #[test]
    fn test_reduce_redacts_output() {
        let current = JobExecution {
            status: JobStatus::Leased,
            leased_by_agent_id: "agent-a".to_string(),
            sensitive_values: vec!["hunter2".to_string()],
            ..Default::default()
        };
        let mut update = status("agent-a", JobStatus::Running);
        update.output = "password=hunter2".to_string();

        let next = reduce(&current, &update, Utc::now()).unwrap().unwrap();
        assert_eq!(next.output, "password=***");
    }

    #[tokio::test]
    async fn test_enqueue_returns_queued_snapshot() {
        let (_dir, pool) = temp_pool().await;
        let job = enqueue(&pool, create("echo hi")).await.unwrap();
        assert!(job.id.starts_with("job-"));
        assert_eq!(job.status, JobStatus::Queued);

        let stored = get_job(&pool, &job.id).await.unwrap();
        assert_eq!(stored.script, "echo hi");
        assert!(matches!(
            get_job(&pool, "job-missing").await,
            Err(JobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_lease_respects_tool_constraints() {
        let (_dir, pool) = temp_pool().await;
        let mut req = create("go test ./...");
        req.required_capabilities = HashMap::from([
            ("os".to_string(), "linux".to_string()),
            ("requires.tool.go".to_string(), ">=1.24.0".to_string()),
        ]);
        let job = enqueue(&pool, req).await.unwrap();

        let old = registry_with("agent-a", &[("os", "linux"), ("tool.go", "1.23.9")]);
        let leased = lease(
            &pool,
            &old,
            &LeaseRequest {
                agent_id: "agent-a".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(leased.is_none());

        let new = registry_with("agent-b", &[("os", "linux"), ("tool.go", "1.24.1")]);
        let leased = lease(
            &pool,
            &new,
            &LeaseRequest {
                agent_id: "agent-b".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(leased.id, job.id);
        assert_eq!(leased.status, JobStatus::Leased);
        assert_eq!(leased.leased_by_agent_id, "agent-b");
    }

    #[tokio::test]
    async fn test_lease_skips_jobs_pinned_to_other_agent() {
        let (_dir, pool) = temp_pool().await;
        let mut req = create("uname -a");
        req.metadata
            .insert(metadata::ADHOC_AGENT_ID.to_string(), "agent-x".to_string());
        enqueue(&pool, req).await.unwrap();

        let registry = AgentRegistry::new();
        let lease_for = |agent: &str| LeaseRequest {
            agent_id: agent.to_string(),
            ..Default::default()
        };
        assert!(lease(&pool, &registry, &lease_for("agent-y")).await.unwrap().is_none());
        assert!(lease(&pool, &registry, &lease_for("agent-x")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_leases_have_single_winner() {
        let (_dir, pool) = temp_pool().await;
        let job = enqueue(&pool, create("make")).await.unwrap();
        let registry = Arc::new(AgentRegistry::new());

        let mut handles = Vec::new();
        for i in 0..8 {
            let pool = pool.clone();
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let req = LeaseRequest {
                    agent_id: format!("agent-{i}"),
                    ..Default::default()
                };
                lease(&pool, &registry, &req).await.unwrap().map(|j| (i, j))
            }));
        }

        let mut winners = Vec::new();
        for handle in handles {
            if let Some(won) = handle.await.unwrap() {
                winners.push(won);
            }
        }
        assert_eq!(winners.len(), 1);

        let (winner, _) = &winners[0];
        let stored = get_job(&pool, &job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Leased);
        assert_eq!(stored.leased_by_agent_id, format!("agent-{winner}"));
    }

    #[tokio::test]
    async fn test_first_terminal_wins_and_output_is_kept() {
        let (_dir, pool) = temp_pool().await;
        let job = leased_job(&pool, "agent-a").await;

        let mut running = status("agent-a", JobStatus::Running);
        running.output = "a".to_string();
        update_status(&pool, &job.id, running).await.unwrap();

        let mut succeeded = status("agent-a", JobStatus::Succeeded);
        succeeded.exit_code = Some(0);
        update_status(&pool, &job.id, succeeded).await.unwrap();

        let mut late = status("agent-a", JobStatus::Running);
        late.output = "late".to_string();
        update_status(&pool, &job.id, late).await.unwrap();

        let mut failed = status("agent-a", JobStatus::Failed);
        failed.exit_code = Some(1);
        update_status(&pool, &job.id, failed).await.unwrap();

        let stored = get_job(&pool, &job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Succeeded);
        assert_eq!(stored.exit_code, Some(0));
        assert_eq!(stored.output, "a");
        assert!(stored.finished_utc.is_some());
    }

    #[tokio::test]
    async fn test_empty_output_patch_preserves_output() {
        let (_dir, pool) = temp_pool().await;
        let job = leased_job(&pool, "agent-a").await;

        let mut running = status("agent-a", JobStatus::Running);
        running.output = "compiling".to_string();
        running.current_step = "Step 1/1: build".to_string();
        update_status(&pool, &job.id, running).await.unwrap();

        update_status(&pool, &job.id, status("agent-a", JobStatus::Running))
            .await
            .unwrap();

        let stored = get_job(&pool, &job.id).await.unwrap();
        assert_eq!(stored.output, "compiling");
        assert_eq!(stored.current_step, "Step 1/1: build");
        assert!(stored.started_utc.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_running_and_succeeded() {
        let (_dir, pool) = temp_pool().await;
        let job = leased_job(&pool, "agent-a").await;
        update_status(&pool, &job.id, status("agent-a", JobStatus::Running))
            .await
            .unwrap();

        let (p1, p2) = (pool.clone(), pool.clone());
        let (id1, id2) = (job.id.clone(), job.id.clone());
        let succeed = tokio::spawn(async move {
            let mut update = status("agent-a", JobStatus::Succeeded);
            update.exit_code = Some(0);
            update_status(&p1, &id1, update).await
        });
        let run = tokio::spawn(async move {
            let mut update = status("agent-a", JobStatus::Running);
            update.output = "still going".to_string();
            update_status(&p2, &id2, update).await
        });
        succeed.await.unwrap().unwrap();
        run.await.unwrap().unwrap();

        let stored = get_job(&pool, &job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Succeeded);
        assert!(stored.finished_utc.is_some());
    }

    #[tokio::test]
    async fn test_status_events_are_recorded() {
        let (_dir, pool) = temp_pool().await;
        let job = leased_job(&pool, "agent-a").await;

        let mut update = status("agent-a", JobStatus::Running);
        update.events = vec![JobEvent::new("step.started").for_step(1, "build")];
        update_status(&pool, &job.id, update).await.unwrap();

        let events = list_events(&pool, &job.id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "step.started");
        assert_eq!(events[0].step_name, "build");
    }

    #[tokio::test]
    async fn test_needs_gate_unblocks_after_success() {
        let (_dir, pool) = temp_pool().await;
        let dep = leased_job(&pool, "agent-a").await;

        let mut req = create("make package");
        req.metadata = HashMap::from([
            (metadata::NEEDS_BLOCKED.to_string(), "1".to_string()),
            (metadata::NEEDS_JOB_IDS.to_string(), dep.id.clone()),
        ]);
        let blocked = enqueue(&pool, req).await.unwrap();
        assert!(job_repository::list_queued(&pool).await.unwrap().is_empty());

        let mut done = status("agent-a", JobStatus::Succeeded);
        done.exit_code = Some(0);
        update_status(&pool, &dep.id, done).await.unwrap();

        let stored = get_job(&pool, &blocked.id).await.unwrap();
        assert!(!stored.is_blocked());
        assert_eq!(stored.env[metadata::DEP_ARTIFACT_JOB_IDS_ENV], dep.id);
        assert_eq!(stored.env[metadata::DEP_ARTIFACT_JOB_ID_ENV], dep.id);
    }

    #[tokio::test]
    async fn test_needs_gate_fails_after_dependency_failure() {
        let (_dir, pool) = temp_pool().await;
        let dep = leased_job(&pool, "agent-a").await;

        let mut req = create("make package");
        req.metadata = HashMap::from([
            (metadata::NEEDS_BLOCKED.to_string(), "1".to_string()),
            (metadata::NEEDS_JOB_IDS.to_string(), dep.id.clone()),
        ]);
        let blocked = enqueue(&pool, req).await.unwrap();

        let mut failed = status("agent-a", JobStatus::Failed);
        failed.error = "boom".to_string();
        update_status(&pool, &dep.id, failed).await.unwrap();

        let stored = get_job(&pool, &blocked.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error, format!("dependency {} failed", dep.id));
    }

    #[tokio::test]
    async fn test_gate_failure_does_not_fail_committed_update() {
        let (_dir, pool) = temp_pool().await;
        let dep = leased_job(&pool, "agent-a").await;

        let mut req = create("make package");
        req.metadata = HashMap::from([
            (metadata::NEEDS_BLOCKED.to_string(), "1".to_string()),
            (metadata::NEEDS_JOB_IDS.to_string(), dep.id.clone()),
        ]);
        let blocked = enqueue(&pool, req).await.unwrap();

        sqlx::query(
            "CREATE TRIGGER no_env_writes BEFORE UPDATE OF env_json ON job_executions \
             BEGIN SELECT RAISE(ABORT, 'env is read-only'); END",
        )
        .execute(&pool)
        .await
        .unwrap();

        let mut done = status("agent-a", JobStatus::Succeeded);
        done.exit_code = Some(0);
        let stored = update_status(&pool, &dep.id, done).await.unwrap();
        assert_eq!(stored.status, JobStatus::Succeeded);
        assert_eq!(get_job(&pool, &dep.id).await.unwrap().status, JobStatus::Succeeded);
        assert!(get_job(&pool, &blocked.id).await.unwrap().is_blocked());
    }

    #[tokio::test]
    async fn test_update_from_requeued_lease_is_not_written() {
        let (_dir, pool) = temp_pool().await;
        let job = enqueue(&pool, create("make")).await.unwrap();
        let an_hour_ago = Utc::now() - chrono::Duration::hours(1);
        assert!(
            job_repository::try_lease(&pool, &job.id, "agent-a", an_hour_ago)
                .await
                .unwrap()
        );

        let snapshot = get_job(&pool, &job.id).await.unwrap();
        let mut update = status("agent-a", JobStatus::Running);
        update.output = "from A".to_string();
        let next = reduce(&snapshot, &update, Utc::now()).unwrap().unwrap();

        let report = crate::service::maintenance::sweep(
            &pool,
            Utc::now(),
            std::time::Duration::from_secs(90),
            std::time::Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(report.requeued, vec![job.id.clone()]);
        assert!(
            job_repository::try_lease(&pool, &job.id, "agent-b", Utc::now())
                .await
                .unwrap()
        );

        // Agent A's reduction was computed against the old lease
        assert!(!write_reduced(&pool, &snapshot, &next, &[]).await.unwrap());
        let stored = get_job(&pool, &job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Leased);
        assert_eq!(stored.leased_by_agent_id, "agent-b");
        assert_eq!(stored.output, "");

        assert!(matches!(
            update_status(&pool, &job.id, update).await,
            Err(JobError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_unblock_and_metadata_merge() {
        let (_dir, pool) = temp_pool().await;
        let mut req = create("deploy");
        req.metadata = HashMap::from([
            (metadata::CHAIN_BLOCKED.to_string(), "1".to_string()),
            ("keep".to_string(), "yes".to_string()),
        ]);
        let job = enqueue(&pool, req).await.unwrap();

        let unblocked = unblock(&pool, &job.id).await.unwrap();
        assert!(!unblocked.is_blocked());
        assert_eq!(unblocked.metadata["keep"], "yes");
        assert!(!unblocked.metadata.contains_key(metadata::CHAIN_BLOCKED));

        assert!(matches!(
            merge_env(&pool, "job-missing", &HashMap::new()).await,
            Err(JobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_running_job_conflicts() {
        let (_dir, pool) = temp_pool().await;
        let job = leased_job(&pool, "agent-a").await;
        update_status(&pool, &job.id, status("agent-a", JobStatus::Running))
            .await
            .unwrap();

        assert!(matches!(
            delete_pending(&pool, &job.id).await,
            Err(JobError::Conflict(_))
        ));
        assert!(matches!(
            flush_agent_history(&pool, " ").await,
            Err(JobError::Validation(_))
        ));
    }
}

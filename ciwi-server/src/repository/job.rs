//! Job Execution Repository
//!
//! Handles all database operations related to job executions. Every write
//! that touches a single job is one statement or one transaction.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ciwi_core::domain::job::{JobEvent, JobExecution, JobStatus, SourceSpec};
use ciwi_core::output::append_control_line;
use sqlx::{SqliteConnection, SqliteExecutor, SqlitePool};

use crate::db::{from_json, from_micros, retry_busy, to_json, to_micros};

const SELECT_COLUMNS: &str = r#"
    SELECT id, script, step_plan_json, env_json, required_caps_json, timeout_seconds,
           source_repo, source_ref, artifact_globs_json, caches_json, metadata_json,
           sensitive_values_json, status, created_utc, leased_utc, started_utc,
           finished_utc, leased_by_agent_id, exit_code, error, output, current_step,
           cache_stats_json, runtime_caps_json
    FROM job_executions
"#;

/// Outcome of deleting a pending job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    NotPending(JobStatus),
}

/// Insert a freshly minted job execution
pub async fn insert(pool: &SqlitePool, job: &JobExecution) -> Result<(), sqlx::Error> {
    let step_plan = to_json(&job.step_plan)?;
    let env = to_json(&job.env)?;
    let required = to_json(&job.required_capabilities)?;
    let globs = to_json(&job.artifact_globs)?;
    let caches = to_json(&job.caches)?;
    let metadata = to_json(&job.metadata)?;
    let sensitive = to_json(&job.sensitive_values)?;
    let source = job.source.clone().unwrap_or_default();

    retry_busy(|| {
        sqlx::query(
            r#"
            INSERT INTO job_executions (
                id, script, step_plan_json, env_json, required_caps_json, timeout_seconds,
                source_repo, source_ref, artifact_globs_json, caches_json, metadata_json,
                sensitive_values_json, status, created_utc
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.script)
        .bind(&step_plan)
        .bind(&env)
        .bind(&required)
        .bind(job.timeout_seconds)
        .bind(&source.repo)
        .bind(&source.git_ref)
        .bind(&globs)
        .bind(&caches)
        .bind(&metadata)
        .bind(&sensitive)
        .bind(job.status.as_str())
        .bind(to_micros(job.created_utc))
        .execute(pool)
    })
    .await?;

    Ok(())
}

/// Find a job execution by ID
pub async fn find_by_id<'e, E>(executor: E, id: &str) -> Result<Option<JobExecution>, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let row = sqlx::query_as::<_, JobRow>(&format!("{SELECT_COLUMNS} WHERE id = ?"))
        .bind(id)
        .fetch_optional(executor)
        .await?;

    Ok(row.map(|r| r.into()))
}

/// List all job executions, newest first
pub async fn list_all(pool: &SqlitePool) -> Result<Vec<JobExecution>, sqlx::Error> {
    let rows = sqlx::query_as::<_, JobRow>(&format!(
        "{SELECT_COLUMNS} ORDER BY created_utc DESC, id DESC"
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Find jobs by status, oldest first
pub async fn find_by_status(
    pool: &SqlitePool,
    status: JobStatus,
) -> Result<Vec<JobExecution>, sqlx::Error> {
    let rows = sqlx::query_as::<_, JobRow>(&format!(
        "{SELECT_COLUMNS} WHERE status = ? ORDER BY created_utc ASC, id ASC"
    ))
    .bind(status.as_str())
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Queued jobs eligible for leasing, in FIFO order
///
/// Jobs gated by `chain_blocked` or `needs_blocked` are left out.
pub async fn list_queued(pool: &SqlitePool) -> Result<Vec<JobExecution>, sqlx::Error> {
    let jobs = find_by_status(pool, JobStatus::Queued).await?;
    Ok(jobs.into_iter().filter(|j| !j.is_blocked()).collect())
}

/// Queued jobs still waiting on a gate
pub async fn list_blocked(pool: &SqlitePool) -> Result<Vec<JobExecution>, sqlx::Error> {
    let jobs = find_by_status(pool, JobStatus::Queued).await?;
    Ok(jobs.into_iter().filter(|j| j.is_blocked()).collect())
}

/// Id, status and metadata of every job, for summaries
pub async fn list_status_rows(
    pool: &SqlitePool,
) -> Result<Vec<(String, JobStatus, HashMap<String, String>)>, sqlx::Error> {
    let rows: Vec<(String, String, String)> =
        sqlx::query_as("SELECT id, status, metadata_json FROM job_executions")
            .fetch_all(pool)
            .await?;

    Ok(rows
        .into_iter()
        .map(|(id, status, metadata)| {
            (
                id,
                status.parse().unwrap_or(JobStatus::Queued),
                from_json(&metadata),
            )
        })
        .collect())
}

// =============================================================================
// State Transitions
// =============================================================================

/// Lease a queued job to `agent_id`
///
/// Returns false when another agent won the race (the row is no longer
/// queued).
pub async fn try_lease(
    pool: &SqlitePool,
    id: &str,
    agent_id: &str,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = retry_busy(|| {
        sqlx::query(
            r#"
            UPDATE job_executions
            SET status = 'leased', leased_by_agent_id = ?, leased_utc = ?
            WHERE id = ? AND status = 'queued'
            "#,
        )
        .bind(agent_id)
        .bind(to_micros(now))
        .bind(id)
        .execute(pool)
    })
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Write the reduced dynamic fields of a job
///
/// `current` is the snapshot `next` was reduced from. The row is written
/// only while it still has that snapshot's status and lease owner, so zero
/// affected rows means another writer (a terminal update, a requeue, a new
/// lease) got there first.
pub async fn write_status<'e, E>(
    executor: E,
    current: &JobExecution,
    next: &JobExecution,
) -> Result<u64, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query(
        r#"
        UPDATE job_executions
        SET status = ?, started_utc = ?, finished_utc = ?, exit_code = ?, error = ?,
            output = ?, current_step = ?, cache_stats_json = ?, runtime_caps_json = ?
        WHERE id = ? AND status = ? AND leased_by_agent_id = ?
          AND status NOT IN ('succeeded', 'failed')
        "#,
    )
    .bind(next.status.as_str())
    .bind(next.started_utc.map(to_micros))
    .bind(next.finished_utc.map(to_micros))
    .bind(next.exit_code)
    .bind(&next.error)
    .bind(&next.output)
    .bind(&next.current_step)
    .bind(to_json(&next.cache_stats)?)
    .bind(to_json(&next.runtime_capabilities)?)
    .bind(&next.id)
    .bind(current.status.as_str())
    .bind(&current.leased_by_agent_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Fail a queued job without it ever being leased
pub async fn fail_queued(
    pool: &SqlitePool,
    id: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let output = append_control_line("", reason);
    let result = retry_busy(|| {
        sqlx::query(
            r#"
            UPDATE job_executions
            SET status = 'failed', error = ?, output = ?, current_step = '',
                started_utc = COALESCE(started_utc, ?), finished_utc = ?
            WHERE id = ? AND status = 'queued'
            "#,
        )
        .bind(reason)
        .bind(&output)
        .bind(to_micros(now))
        .bind(to_micros(now))
        .bind(id)
        .execute(pool)
    })
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Requeue leased jobs whose lease is older than `max_age`
///
/// Each row moves back to queued only if it is still leased. Returns the
/// requeued ids.
pub async fn requeue_stale_leased(
    pool: &SqlitePool,
    now: DateTime<Utc>,
    max_age: Duration,
) -> Result<Vec<String>, sqlx::Error> {
    let cutoff = to_micros(now) - max_age.as_micros() as i64;

    retry_busy(|| {
        sqlx::query_scalar::<_, String>(
            r#"
            UPDATE job_executions
            SET status = 'queued', leased_by_agent_id = '', leased_utc = NULL, current_step = ''
            WHERE status = 'leased' AND leased_utc IS NOT NULL AND leased_utc < ?
            RETURNING id
            "#,
        )
        .bind(cutoff)
        .fetch_all(pool)
    })
    .await
}

/// Fail running jobs past `started_utc + timeout + grace`
///
/// Appends a `[control] <reason>` line to the stored output. Returns the
/// failed ids.
pub async fn fail_timed_out_running(
    pool: &SqlitePool,
    now: DateTime<Utc>,
    grace: Duration,
    reason: &str,
) -> Result<Vec<String>, sqlx::Error> {
    let candidates: Vec<(String, i64, i64, String)> = sqlx::query_as(
        r#"
        SELECT id, started_utc, timeout_seconds, output
        FROM job_executions
        WHERE status = 'running' AND timeout_seconds > 0 AND started_utc IS NOT NULL
        "#,
    )
    .fetch_all(pool)
    .await?;

    let now_micros = to_micros(now);
    let grace_micros = grace.as_micros() as i64;
    let mut failed = Vec::new();

    for (id, started, timeout_seconds, output) in candidates {
        // Saturates: a timeout too large to represent never expires
        let deadline = timeout_seconds
            .saturating_mul(1_000_000)
            .saturating_add(grace_micros)
            .saturating_add(started);
        if deadline > now_micros {
            continue;
        }

        let output = append_control_line(&output, reason);
        let result = retry_busy(|| {
            sqlx::query(
                r#"
                UPDATE job_executions
                SET status = 'failed', error = ?, output = ?, current_step = '', finished_utc = ?
                WHERE id = ? AND status = 'running'
                "#,
            )
            .bind(reason)
            .bind(&output)
            .bind(now_micros)
            .bind(&id)
            .execute(pool)
        })
        .await?;

        if result.rows_affected() == 1 {
            failed.push(id);
        }
    }

    Ok(failed)
}

// =============================================================================
// Map Merges
// =============================================================================

/// Which JSON map column a merge targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapColumn {
    Env,
    Metadata,
}

impl MapColumn {
    fn column(self) -> &'static str {
        match self {
            MapColumn::Env => "env_json",
            MapColumn::Metadata => "metadata_json",
        }
    }
}

/// Apply `patch` to `current`: blank values delete, others set
pub fn apply_map_patch(current: &mut HashMap<String, String>, patch: &HashMap<String, String>) {
    for (key, value) in patch {
        if value.trim().is_empty() {
            current.remove(key);
        } else {
            current.insert(key.clone(), value.clone());
        }
    }
}

/// Merge a patch into the env or metadata map of a job in one transaction
///
/// Returns false when the job does not exist.
pub async fn merge_map(
    pool: &SqlitePool,
    id: &str,
    column: MapColumn,
    patch: &HashMap<String, String>,
) -> Result<bool, sqlx::Error> {
    retry_busy(|| merge_map_once(pool, id, column, patch)).await
}

async fn merge_map_once(
    pool: &SqlitePool,
    id: &str,
    column: MapColumn,
    patch: &HashMap<String, String>,
) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let select = format!("SELECT {} FROM job_executions WHERE id = ?", column.column());
    let Some(raw) = sqlx::query_scalar::<_, String>(&select)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
    else {
        return Ok(false);
    };

    let mut current: HashMap<String, String> = from_json(&raw);
    apply_map_patch(&mut current, patch);

    let update = format!("UPDATE job_executions SET {} = ? WHERE id = ?", column.column());
    sqlx::query(&update)
        .bind(to_json(&current)?)
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(true)
}

// =============================================================================
// Deletion
// =============================================================================

/// Delete a job that is still queued or leased
pub async fn delete_pending(pool: &SqlitePool, id: &str) -> Result<DeleteOutcome, sqlx::Error> {
    let result = retry_busy(|| {
        sqlx::query("DELETE FROM job_executions WHERE id = ? AND status IN ('queued', 'leased')")
            .bind(id)
            .execute(pool)
    })
    .await?;

    if result.rows_affected() > 0 {
        return Ok(DeleteOutcome::Deleted);
    }

    let status: Option<String> =
        sqlx::query_scalar("SELECT status FROM job_executions WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;

    Ok(match status {
        None => DeleteOutcome::NotFound,
        Some(s) => DeleteOutcome::NotPending(s.parse().unwrap_or(JobStatus::Running)),
    })
}

/// Delete every queued and leased job
pub async fn clear_queue(pool: &SqlitePool) -> Result<u64, sqlx::Error> {
    let result = retry_busy(|| {
        sqlx::query("DELETE FROM job_executions WHERE status IN ('queued', 'leased')")
            .execute(pool)
    })
    .await?;

    Ok(result.rows_affected())
}

/// Delete every terminal job
pub async fn flush_history(pool: &SqlitePool) -> Result<u64, sqlx::Error> {
    let result = retry_busy(|| {
        sqlx::query("DELETE FROM job_executions WHERE status IN ('succeeded', 'failed')")
            .execute(pool)
    })
    .await?;

    Ok(result.rows_affected())
}

/// Delete terminal jobs that were executed by `agent_id`
pub async fn flush_agent_history(pool: &SqlitePool, agent_id: &str) -> Result<u64, sqlx::Error> {
    let result = retry_busy(|| {
        sqlx::query(
            r#"
            DELETE FROM job_executions
            WHERE leased_by_agent_id = ? AND status IN ('succeeded', 'failed')
            "#,
        )
        .bind(agent_id)
        .execute(pool)
    })
    .await?;

    Ok(result.rows_affected())
}

// =============================================================================
// Events
// =============================================================================

/// Append events to a job
pub async fn insert_events(
    conn: &mut SqliteConnection,
    job_id: &str,
    events: &[JobEvent],
) -> Result<(), sqlx::Error> {
    for event in events {
        sqlx::query(
            r#"
            INSERT INTO job_events (job_id, event_type, utc, step_index, step_name, message)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job_id)
        .bind(&event.event_type)
        .bind(to_micros(event.utc))
        .bind(event.step_index as i64)
        .bind(&event.step_name)
        .bind(&event.message)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Events of a job in insertion order
pub async fn list_events(pool: &SqlitePool, job_id: &str) -> Result<Vec<JobEvent>, sqlx::Error> {
    let rows: Vec<(String, i64, i64, String, String)> = sqlx::query_as(
        r#"
        SELECT event_type, utc, step_index, step_name, message
        FROM job_events
        WHERE job_id = ?
        ORDER BY id ASC
        "#,
    )
    .bind(job_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(event_type, utc, step_index, step_name, message)| JobEvent {
            event_type,
            utc: from_micros(utc),
            step_index: step_index.max(0) as usize,
            step_name,
            message,
        })
        .collect())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    script: String,
    step_plan_json: String,
    env_json: String,
    required_caps_json: String,
    timeout_seconds: i64,
    source_repo: String,
    source_ref: String,
    artifact_globs_json: String,
    caches_json: String,
    metadata_json: String,
    sensitive_values_json: String,
    status: String,
    created_utc: i64,
    leased_utc: Option<i64>,
    started_utc: Option<i64>,
    finished_utc: Option<i64>,
    leased_by_agent_id: String,
    exit_code: Option<i64>,
    error: String,
    output: String,
    current_step: String,
    cache_stats_json: String,
    runtime_caps_json: String,
}

impl From<JobRow> for JobExecution {
    fn from(row: JobRow) -> Self {
        let source = if row.source_repo.is_empty() {
            None
        } else {
            Some(SourceSpec {
                repo: row.source_repo,
                git_ref: row.source_ref,
            })
        };

        JobExecution {
            id: row.id,
            script: row.script,
            step_plan: from_json(&row.step_plan_json),
            env: from_json(&row.env_json),
            required_capabilities: from_json(&row.required_caps_json),
            timeout_seconds: row.timeout_seconds,
            source,
            artifact_globs: from_json(&row.artifact_globs_json),
            caches: from_json(&row.caches_json),
            metadata: from_json(&row.metadata_json),
            sensitive_values: from_json(&row.sensitive_values_json),
            status: row.status.parse().unwrap_or(JobStatus::Queued),
            created_utc: from_micros(row.created_utc),
            leased_utc: row.leased_utc.map(from_micros),
            started_utc: row.started_utc.map(from_micros),
            finished_utc: row.finished_utc.map(from_micros),
            leased_by_agent_id: row.leased_by_agent_id,
            exit_code: row.exit_code.map(|c| c as i32),
            error: row.error,
            output: row.output,
            current_step: row.current_step,
            cache_stats: from_json(&row.cache_stats_json),
            runtime_capabilities: from_json(&row.runtime_caps_json),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::temp_pool;

    fn queued_job(id: &str, created_utc: DateTime<Utc>) -> JobExecution {
        JobExecution {
            id: id.to_string(),
            script: "echo hi".to_string(),
            created_utc,
            ..Default::default()
        }
    }

    async fn set_leased(pool: &SqlitePool, id: &str, agent: &str, leased: DateTime<Utc>) {
        sqlx::query(
            "UPDATE job_executions SET status = 'leased', leased_by_agent_id = ?, leased_utc = ?, current_step = 'Step 1/1: x' WHERE id = ?",
        )
        .bind(agent)
        .bind(to_micros(leased))
        .bind(id)
        .execute(pool)
        .await
        .unwrap();
    }

    #[test]
    fn test_apply_map_patch() {
        let mut current = HashMap::from([
            ("A".to_string(), "1".to_string()),
            ("B".to_string(), "2".to_string()),
            ("C".to_string(), "3".to_string()),
        ]);
        let patch = HashMap::from([
            ("A".to_string(), "  ".to_string()),
            ("B".to_string(), "20".to_string()),
            ("D".to_string(), "4".to_string()),
        ]);

        apply_map_patch(&mut current, &patch);

        assert!(!current.contains_key("A"));
        assert_eq!(current["B"], "20");
        assert_eq!(current["C"], "3");
        assert_eq!(current["D"], "4");
    }

    #[tokio::test]
    async fn test_list_queued_is_fifo_and_skips_blocked() {
        let (_dir, pool) = temp_pool().await;
        let now = Utc::now();

        insert(&pool, &queued_job("job-b", now)).await.unwrap();
        insert(&pool, &queued_job("job-a", now)).await.unwrap();
        insert(&pool, &queued_job("job-0", now - chrono::Duration::seconds(5)))
            .await
            .unwrap();
        let mut blocked = queued_job("job-blocked", now - chrono::Duration::seconds(10));
        blocked
            .metadata
            .insert("needs_blocked".to_string(), "1".to_string());
        insert(&pool, &blocked).await.unwrap();

        let ids: Vec<String> = list_queued(&pool)
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(ids, vec!["job-0", "job-a", "job-b"]);

        let blocked: Vec<String> = list_blocked(&pool)
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(blocked, vec!["job-blocked"]);
    }

    #[tokio::test]
    async fn test_try_lease_single_winner() {
        let (_dir, pool) = temp_pool().await;
        insert(&pool, &queued_job("job-1", Utc::now())).await.unwrap();

        assert!(try_lease(&pool, "job-1", "agent-a", Utc::now()).await.unwrap());
        assert!(!try_lease(&pool, "job-1", "agent-b", Utc::now()).await.unwrap());

        let job = find_by_id(&pool, "job-1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Leased);
        assert_eq!(job.leased_by_agent_id, "agent-a");
        assert!(job.leased_utc.is_some());
    }

    #[tokio::test]
    async fn test_requeue_stale_leased() {
        let (_dir, pool) = temp_pool().await;
        let now = Utc::now();
        insert(&pool, &queued_job("job-stale", now)).await.unwrap();
        insert(&pool, &queued_job("job-fresh", now)).await.unwrap();
        set_leased(&pool, "job-stale", "agent-a", now - chrono::Duration::seconds(120)).await;
        set_leased(&pool, "job-fresh", "agent-a", now - chrono::Duration::seconds(10)).await;

        let requeued = requeue_stale_leased(&pool, now, Duration::from_secs(90))
            .await
            .unwrap();
        assert_eq!(requeued, vec!["job-stale"]);

        let job = find_by_id(&pool, "job-stale").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.leased_by_agent_id, "");
        assert_eq!(job.leased_utc, None);
        assert_eq!(job.current_step, "");

        let fresh = find_by_id(&pool, "job-fresh").await.unwrap().unwrap();
        assert_eq!(fresh.status, JobStatus::Leased);
    }

    #[tokio::test]
    async fn test_fail_timed_out_running_appends_control_line() {
        let (_dir, pool) = temp_pool().await;
        let now = Utc::now();
        let mut job = queued_job("job-slow", now);
        job.timeout_seconds = 5;
        insert(&pool, &job).await.unwrap();
        sqlx::query(
            "UPDATE job_executions SET status = 'running', started_utc = ?, output = 'building' WHERE id = ?",
        )
        .bind(to_micros(now - chrono::Duration::seconds(20)))
        .bind("job-slow")
        .execute(&pool)
        .await
        .unwrap();

        let reason = "job timed out while running (server maintenance)";
        let failed = fail_timed_out_running(&pool, now, Duration::from_secs(5), reason)
            .await
            .unwrap();
        assert_eq!(failed, vec!["job-slow"]);

        let job = find_by_id(&pool, "job-slow").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error, reason);
        assert_eq!(job.output, format!("building\n[control] {reason}"));
        assert!(job.finished_utc.is_some());
        assert_eq!(job.current_step, "");
    }

    #[tokio::test]
    async fn test_merge_map_env_and_metadata() {
        let (_dir, pool) = temp_pool().await;
        let mut job = queued_job("job-1", Utc::now());
        job.env.insert("KEEP".to_string(), "1".to_string());
        job.env.insert("DROP".to_string(), "x".to_string());
        insert(&pool, &job).await.unwrap();

        let patch = HashMap::from([
            ("DROP".to_string(), " ".to_string()),
            ("NEW".to_string(), "v".to_string()),
        ]);
        assert!(merge_map(&pool, "job-1", MapColumn::Env, &patch).await.unwrap());
        assert!(!merge_map(&pool, "missing", MapColumn::Metadata, &patch).await.unwrap());

        let job = find_by_id(&pool, "job-1").await.unwrap().unwrap();
        assert_eq!(job.env.len(), 2);
        assert_eq!(job.env["KEEP"], "1");
        assert_eq!(job.env["NEW"], "v");
    }

    #[tokio::test]
    async fn test_delete_pending_outcomes() {
        let (_dir, pool) = temp_pool().await;
        insert(&pool, &queued_job("job-q", Utc::now())).await.unwrap();
        insert(&pool, &queued_job("job-r", Utc::now())).await.unwrap();
        sqlx::query("UPDATE job_executions SET status = 'running' WHERE id = 'job-r'")
            .execute(&pool)
            .await
            .unwrap();

        assert_eq!(delete_pending(&pool, "job-q").await.unwrap(), DeleteOutcome::Deleted);
        assert_eq!(delete_pending(&pool, "job-q").await.unwrap(), DeleteOutcome::NotFound);
        assert_eq!(
            delete_pending(&pool, "job-r").await.unwrap(),
            DeleteOutcome::NotPending(JobStatus::Running)
        );
    }
}

//! Maintenance sweeper
//!
//! Periodically requeues stale leases and fails running jobs that blew
//! through their timeout.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::repository::job_repository;
use crate::service::job::{self as job_service, JobError};
use crate::state::AppState;

/// Error recorded on jobs failed by the sweeper
pub const TIMEOUT_REASON: &str = "job timed out while running (server maintenance)";

/// What one sweep changed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub requeued: Vec<String>,
    pub timed_out: Vec<String>,
}

/// Run one sweep at `now`
pub async fn sweep(
    pool: &SqlitePool,
    now: DateTime<Utc>,
    lease_max_age: Duration,
    timeout_grace: Duration,
) -> Result<SweepReport, JobError> {
    let requeued = job_repository::requeue_stale_leased(pool, now, lease_max_age).await?;
    for id in &requeued {
        info!(job_id = %id, "Requeued stale lease");
    }

    let timed_out =
        job_repository::fail_timed_out_running(pool, now, timeout_grace, TIMEOUT_REASON).await?;
    for id in &timed_out {
        info!(job_id = %id, "Failed timed out job");
    }

    // Also picks up gates a failed resolution left behind
    let resolved = job_service::resolve_dependency_gates(pool).await?;
    if resolved > 0 {
        info!(resolved, "Resolved dependency gates");
    }

    Ok(SweepReport {
        requeued,
        timed_out,
    })
}

/// Spawn the sweeper loop; it stops when `shutdown` is cancelled
pub fn spawn_sweeper(state: AppState, shutdown: CancellationToken) -> JoinHandle<()> {
    let period = state.config.maintenance_interval;
    let max_age = state.config.lease_max_age;
    let grace = state.config.timeout_grace;

    tokio::spawn(async move {
        info!("Starting maintenance sweeper (interval: {:?})", period);
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            debug!("Running maintenance sweep");
            if let Err(e) = sweep(&state.pool, Utc::now(), max_age, grace).await {
                error!("Maintenance sweep failed: {:#}", e);
            }
        }

        info!("Maintenance sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::temp_pool;
    use ciwi_core::domain::job::{JobExecution, JobStatus};

    async fn seed(pool: &SqlitePool, now: DateTime<Utc>) {
        let leased = JobExecution {
            id: "job-leased".to_string(),
            script: "true".to_string(),
            status: JobStatus::Leased,
            leased_by_agent_id: "agent-a".to_string(),
            leased_utc: Some(now - chrono::Duration::seconds(120)),
            ..Default::default()
        };
        let running = JobExecution {
            id: "job-running".to_string(),
            script: "sleep 100".to_string(),
            status: JobStatus::Running,
            timeout_seconds: 5,
            leased_by_agent_id: "agent-a".to_string(),
            started_utc: Some(now - chrono::Duration::seconds(20)),
            output: "partial".to_string(),
            ..Default::default()
        };
        let fresh = JobExecution {
            id: "job-fresh".to_string(),
            script: "true".to_string(),
            status: JobStatus::Leased,
            leased_by_agent_id: "agent-b".to_string(),
            leased_utc: Some(now - chrono::Duration::seconds(10)),
            ..Default::default()
        };
        for job in [leased, running, fresh] {
            job_repository::insert(pool, &job).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_sweep_requeues_and_times_out() {
        let (_dir, pool) = temp_pool().await;
        let now = Utc::now();
        seed(&pool, now).await;

        let report = sweep(&pool, now, Duration::from_secs(90), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(report.requeued, vec!["job-leased"]);
        assert_eq!(report.timed_out, vec!["job-running"]);

        let failed = job_repository::find_by_id(&pool, "job-running")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error, TIMEOUT_REASON);
        assert!(failed.output.ends_with(&format!("\n[control] {TIMEOUT_REASON}")));
    }

    #[tokio::test]
    async fn test_huge_timeout_never_expires() {
        let (_dir, pool) = temp_pool().await;
        let now = Utc::now();
        let job = JobExecution {
            id: "job-forever".to_string(),
            script: "sleep 100".to_string(),
            status: JobStatus::Running,
            timeout_seconds: i64::MAX / 2,
            leased_by_agent_id: "agent-a".to_string(),
            started_utc: Some(now - chrono::Duration::seconds(20)),
            ..Default::default()
        };
        job_repository::insert(&pool, &job).await.unwrap();

        let report = sweep(&pool, now, Duration::from_secs(90), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(report.timed_out.is_empty());
        let stored = job_repository::find_by_id(&pool, "job-forever")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let (_dir, pool) = temp_pool().await;
        let now = Utc::now();
        seed(&pool, now).await;

        let grace = Duration::from_secs(5);
        let max_age = Duration::from_secs(90);
        sweep(&pool, now, max_age, grace).await.unwrap();
        let once = job_repository::list_all(&pool).await.unwrap();

        let second = sweep(&pool, now, max_age, grace).await.unwrap();
        assert_eq!(second, SweepReport::default());
        let twice = job_repository::list_all(&pool).await.unwrap();
        assert_eq!(once, twice);
    }
}

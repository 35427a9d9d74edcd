//! Live output streaming
//!
//! While a job runs, a sibling task periodically posts the redacted tail
//! of its output. Nothing is queued: each tick sends the current snapshot,
//! and only when it or the step label changed since the last delivery.

use std::sync::Arc;
use std::time::Duration;

use ciwi_core::domain::job::JobStatus;
use ciwi_core::dto::job::StatusUpdate;
use ciwi_core::output::prepare_output;
use crate::service::LogBufferService;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::context::JobContext;
use crate::repository::JobRepository;

/// Spawns the streamer; it runs until `stop` is cancelled
pub fn spawn_streamer(
    ctx: Arc<JobContext>,
    repo: Arc<dyn JobRepository>,
    interval: Duration,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last_sent: Option<(String, String)> = None;

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let output = prepare_output(&ctx.output.snapshot(), &ctx.job.sensitive_values);
            let step = ctx.current_step();
            if output.is_empty() && step.is_empty() {
                continue;
            }
            let snapshot = (output, step);
            if last_sent.as_ref() == Some(&snapshot) {
                continue;
            }

            let mut update = StatusUpdate::new(&ctx.agent_id, JobStatus::Running);
            update.output = snapshot.0.clone();
            update.current_step = snapshot.1.clone();
            match repo.update_status(&ctx.job.id, &update).await {
                Ok(()) => last_sent = Some(snapshot),
                // Dropped; the next tick sends a fresher snapshot anyway
                Err(e) => debug!(job_id = %ctx.job.id, "Live output update failed: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use ciwi_core::domain::job::JobExecution;

    use super::*;
    use crate::repository::testing::FakeJobRepository;
    use crate::service::LogBufferService;

    #[tokio::test]
    async fn test_posts_only_changes_and_redacts() {
        let job = JobExecution {
            id: "job-1".to_string(),
            sensitive_values: vec!["hunter2".to_string()],
            ..Default::default()
        };
        let ctx = Arc::new(JobContext::new(job, "agent-1"));
        let repo = Arc::new(FakeJobRepository::default());
        let stop = CancellationToken::new();

        let handle = spawn_streamer(
            Arc::clone(&ctx),
            repo.clone(),
            Duration::from_millis(20),
            stop.clone(),
        );

        ctx.output.line("password is hunter2");
        tokio::time::sleep(Duration::from_millis(120)).await;
        ctx.set_current_step("Step 1/1: build");
        tokio::time::sleep(Duration::from_millis(120)).await;
        stop.cancel();
        handle.await.unwrap();

        let updates = repo.updates();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].output, "password is ***\n");
        assert_eq!(updates[0].status, JobStatus::Running);
        assert_eq!(updates[1].current_step, "Step 1/1: build");
        assert!(updates.iter().all(|u| !u.output.contains("hunter2")));
    }
}

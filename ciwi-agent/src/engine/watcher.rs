//! Control-plane watcher
//!
//! Polls the server's view of the running job. When the server has already
//! moved it to a terminal status (cancelled, timed out by the sweeper, or
//! failed by a dependency), the local execution is cancelled.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::context::JobContext;
use crate::repository::JobRepository;

/// Spawns the watcher; it runs until `stop` is cancelled or it cancels the job
pub fn spawn_watcher(
    ctx: Arc<JobContext>,
    repo: Arc<dyn JobRepository>,
    interval: Duration,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let server_job = match repo.get_job(&ctx.job.id).await {
                Ok(job) => job,
                Err(e) if e.is_not_found() => {
                    info!(job_id = %ctx.job.id, "Job deleted on the server, cancelling");
                    ctx.log("[control] job was deleted on the server");
                    ctx.cancel_with("job was deleted on the server");
                    break;
                }
                Err(e) => {
                    debug!(job_id = %ctx.job.id, "Control-plane poll failed: {}", e);
                    continue;
                }
            };

            if server_job.status.is_terminal() {
                let reason = if server_job.error.trim().is_empty() {
                    format!("job is {} on the server", server_job.status)
                } else {
                    format!(
                        "job is {} on the server: {}",
                        server_job.status,
                        server_job.error.trim()
                    )
                };
                info!(job_id = %ctx.job.id, status = %server_job.status, "Server ended job, cancelling");
                ctx.log(format!("[control] {reason}"));
                ctx.cancel_with(reason);
                break;
            }
        }
    })
}

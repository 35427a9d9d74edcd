//! Terminal status reporting
//!
//! The final status of a job is the one message that must get through, so
//! it is retried with exponential back-off. Each attempt is bounded.

use std::time::Duration;

use anyhow::{Result, anyhow};
use ciwi_core::dto::job::StatusUpdate;
use tracing::{info, warn};

use crate::repository::JobRepository;

/// Attempts before a terminal report is given up
pub const REPORT_ATTEMPTS: u32 = 5;

/// Bound on a single attempt
pub const REPORT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Back-off before retry `attempt` (1-based): 1, 2, 4, 8 s
pub fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << (attempt.saturating_sub(1)).min(16))
}

/// Posts the terminal status of `job_id`, retrying transient failures
///
/// Client errors (the server refused the update, for instance because the
/// job belongs to another agent) are not retried.
pub async fn report_terminal(
    repo: &dyn JobRepository,
    job_id: &str,
    update: &StatusUpdate,
) -> Result<()> {
    report_terminal_with(repo, job_id, update, backoff).await
}

pub(crate) async fn report_terminal_with(
    repo: &dyn JobRepository,
    job_id: &str,
    update: &StatusUpdate,
    delay: impl Fn(u32) -> Duration,
) -> Result<()> {
    let mut last_error = None;
    for attempt in 1..=REPORT_ATTEMPTS {
        match repo
            .update_status_with_timeout(job_id, update, REPORT_ATTEMPT_TIMEOUT)
            .await
        {
            Ok(()) => {
                info!(job_id = %job_id, status = %update.status, attempt, "Reported terminal status");
                return Ok(());
            }
            Err(e) if e.is_client_error() => {
                return Err(anyhow!("server rejected terminal status: {e}"));
            }
            Err(e) => {
                warn!(job_id = %job_id, attempt, "Terminal status report failed: {}", e);
                last_error = Some(e);
            }
        }
        if attempt < REPORT_ATTEMPTS {
            tokio::time::sleep(delay(attempt)).await;
        }
    }

    Err(anyhow!(
        "terminal status not delivered after {} attempts: {}",
        REPORT_ATTEMPTS,
        last_error.map(|e| e.to_string()).unwrap_or_default()
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use ciwi_core::domain::job::JobStatus;

    use super::*;
    use crate::repository::testing::FakeJobRepository;

    #[test]
    fn test_backoff_sequence() {
        let delays: Vec<u64> = (1..REPORT_ATTEMPTS).map(|a| backoff(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8]);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let repo = FakeJobRepository::default();
        repo.failing_reports.store(3, Ordering::SeqCst);
        let update = StatusUpdate::new("agent-1", JobStatus::Succeeded);

        report_terminal_with(&repo, "job-1", &update, |_| Duration::from_millis(1))
            .await
            .unwrap();

        assert_eq!(repo.report_attempts.load(Ordering::SeqCst), 4);
        assert_eq!(repo.updates().len(), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_five_attempts() {
        let repo = FakeJobRepository::default();
        repo.failing_reports.store(10, Ordering::SeqCst);
        let update = StatusUpdate::new("agent-1", JobStatus::Failed);

        let err = report_terminal_with(&repo, "job-1", &update, |_| Duration::from_millis(1))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("after 5 attempts"));
        assert_eq!(repo.report_attempts.load(Ordering::SeqCst), 5);
        assert!(repo.updates().is_empty());
    }
}

//! WatchState snapshots
//!
//! Builds the periodic, purely observational state snapshots streamed to
//! GUI clients.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use ciwi_core::domain::job::JobStatus;
use ciwi_core::domain::metadata;
use ciwi_core::dto::state::{JobsSummary, ServerInfo, StateSnapshot};

use crate::repository::{app_state_repository, job_repository, project_repository};
use crate::state::AppState;

/// Build one snapshot
pub async fn snapshot(
    state: &AppState,
    stream_id: &str,
    seq: u64,
) -> Result<StateSnapshot, sqlx::Error> {
    let rows = job_repository::list_status_rows(&state.pool).await?;
    let projects = project_repository::list_summaries(&state.pool).await?;
    let update_status =
        app_state_repository::get(&state.pool, app_state_repository::UPDATE_STATUS)
            .await?
            .unwrap_or_default();

    Ok(StateSnapshot {
        stream_id: stream_id.to_string(),
        seq,
        sent_utc: Utc::now(),
        server_info: ServerInfo {
            name: server_name(&state.config.service_name),
            version: env!("CARGO_PKG_VERSION").to_string(),
            update_status,
        },
        projects,
        agents: state.agents.list(),
        jobs_summary: summarize_jobs(&rows),
    })
}

fn server_name(service_name: &str) -> String {
    if service_name.is_empty() {
        "ciwi".to_string()
    } else {
        service_name.to_string()
    }
}

/// Count pending and finished jobs, plus the distinct pipeline runs among them
///
/// Executions of one pipeline trigger share a group; anything else is its
/// own group.
pub fn summarize_jobs(rows: &[(String, JobStatus, HashMap<String, String>)]) -> JobsSummary {
    let mut summary = JobsSummary::default();
    let mut queued_groups = HashSet::new();
    let mut history_groups = HashSet::new();

    for (id, status, meta) in rows {
        let group = meta
            .get(metadata::PIPELINE_RUN_ID)
            .filter(|g| !g.is_empty())
            .unwrap_or(id)
            .as_str();

        if status.is_terminal() {
            summary.history_count += 1;
            history_groups.insert(group);
        } else {
            summary.queued_count += 1;
            queued_groups.insert(group);
        }
    }

    summary.queued_group_count = queued_groups.len() as u64;
    summary.history_group_count = history_groups.len() as u64;
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, status: JobStatus, run: &str) -> (String, JobStatus, HashMap<String, String>) {
        let mut meta = HashMap::new();
        if !run.is_empty() {
            meta.insert(metadata::PIPELINE_RUN_ID.to_string(), run.to_string());
        }
        (id.to_string(), status, meta)
    }

    #[test]
    fn test_summarize_jobs_groups_pipeline_runs() {
        let rows = vec![
            row("job-1", JobStatus::Queued, "run-1"),
            row("job-2", JobStatus::Running, "run-1"),
            row("job-3", JobStatus::Leased, ""),
            row("job-4", JobStatus::Succeeded, "run-0"),
            row("job-5", JobStatus::Failed, "run-0"),
            row("job-6", JobStatus::Failed, ""),
        ];

        let summary = summarize_jobs(&rows);
        assert_eq!(
            summary,
            JobsSummary {
                queued_count: 3,
                history_count: 3,
                queued_group_count: 2,
                history_group_count: 2,
            }
        );
    }

    #[test]
    fn test_server_name_defaults() {
        assert_eq!(server_name(""), "ciwi");
        assert_eq!(server_name("ciwi-server"), "ciwi-server");
    }
}

//! Test Report Repository
//!
//! At most one JSON report per job; the last write wins.

use chrono::Utc;
use ciwi_core::domain::test_report::JobTestReport;
use sqlx::SqlitePool;

use crate::db::{retry_busy, to_json, to_micros};

/// Store the report of a job, replacing any earlier one
pub async fn upsert(
    pool: &SqlitePool,
    job_id: &str,
    report: &JobTestReport,
) -> Result<(), sqlx::Error> {
    let report_json = to_json(report)?;
    let now = to_micros(Utc::now());

    retry_busy(|| {
        sqlx::query(
            r#"
            INSERT INTO job_test_reports (job_id, report_json, updated_utc)
            VALUES (?, ?, ?)
            ON CONFLICT(job_id) DO UPDATE SET
                report_json = excluded.report_json,
                updated_utc = excluded.updated_utc
            "#,
        )
        .bind(job_id)
        .bind(&report_json)
        .bind(now)
        .execute(pool)
    })
    .await?;

    Ok(())
}

/// Find the report of a job
pub async fn find_by_job(
    pool: &SqlitePool,
    job_id: &str,
) -> Result<Option<JobTestReport>, sqlx::Error> {
    let raw: Option<String> =
        sqlx::query_scalar("SELECT report_json FROM job_test_reports WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(pool)
            .await?;

    raw.map(|r| serde_json::from_str(&r).map_err(|e| sqlx::Error::Decode(Box::new(e))))
        .transpose()
}

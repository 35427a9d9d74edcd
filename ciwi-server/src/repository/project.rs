//! Project Repository
//!
//! Persists the project -> pipeline -> pipeline job tree. A reload replaces
//! the whole tree of one project inside a single transaction.

use std::collections::BTreeMap;

use chrono::Utc;
use ciwi_core::domain::job::{CoverageFormat, JobCacheSpec, StepKind, TestReportFormat};
use ciwi_core::domain::project::{
    PipelineDetail, PipelineJob, PipelineJobRequirements, PipelineMatrix, PipelineStep, Project,
    ProjectDetail, ProjectSecretSpec, ProjectSummary,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::{SqliteConnection, SqlitePool};

use crate::db::{from_json, from_micros, retry_busy, to_json, to_micros};

/// Insert or replace a project and its pipeline tree
///
/// The project is matched by name. Its pipelines are deleted (cascading to
/// jobs, steps and matrix includes) and re-inserted in order. Returns the
/// project's database id.
pub async fn replace_tree(
    pool: &SqlitePool,
    project: &Project,
    pipelines: &[PipelineDetail],
    secrets: &[ProjectSecretSpec],
) -> Result<i64, sqlx::Error> {
    retry_busy(|| replace_tree_once(pool, project, pipelines, secrets)).await
}

async fn replace_tree_once(
    pool: &SqlitePool,
    project: &Project,
    pipelines: &[PipelineDetail],
    secrets: &[ProjectSecretSpec],
) -> Result<i64, sqlx::Error> {
    let now = to_micros(Utc::now());
    let mut tx = pool.begin().await?;

    let project_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO projects (name, repo_url, repo_ref, config_file, secrets_json, created_utc, updated_utc)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(name) DO UPDATE SET
            repo_url = excluded.repo_url,
            repo_ref = excluded.repo_ref,
            config_file = excluded.config_file,
            secrets_json = excluded.secrets_json,
            updated_utc = excluded.updated_utc
        RETURNING id
        "#,
    )
    .bind(&project.name)
    .bind(&project.repo_url)
    .bind(&project.repo_ref)
    .bind(&project.config_file)
    .bind(to_json(&secrets)?)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM pipelines WHERE project_id = ?")
        .bind(project_id)
        .execute(&mut *tx)
        .await?;

    for (position, pipeline) in pipelines.iter().enumerate() {
        let pipeline_db_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO pipelines (project_id, pipeline_id, position, source_repo, source_ref)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(project_id)
        .bind(&pipeline.pipeline_id)
        .bind(position as i64)
        .bind(&pipeline.source_repo)
        .bind(&pipeline.source_ref)
        .fetch_one(&mut *tx)
        .await?;

        for (job_position, job) in pipeline.jobs.iter().enumerate() {
            insert_pipeline_job(&mut *tx, pipeline_db_id, job_position, job).await?;
        }
    }

    tx.commit().await?;
    Ok(project_id)
}

async fn insert_pipeline_job(
    conn: &mut SqliteConnection,
    pipeline_db_id: i64,
    position: usize,
    job: &PipelineJob,
) -> Result<(), sqlx::Error> {
    let job_db_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO pipeline_jobs (
            pipeline_db_id, job_id, position, runs_on_json, requires_json,
            timeout_seconds, artifacts_json, caches_json, needs_json
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(pipeline_db_id)
    .bind(&job.id)
    .bind(position as i64)
    .bind(to_json(&job.runs_on)?)
    .bind(to_json(&job.requires)?)
    .bind(job.timeout_seconds)
    .bind(to_json(&job.artifacts)?)
    .bind(to_json(&job.caches)?)
    .bind(to_json(&job.needs)?)
    .fetch_one(&mut *conn)
    .await?;

    for (step_position, step) in job.steps.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO pipeline_job_steps (
                pipeline_job_db_id, position, name, run, env_json, kind,
                test_report, test_format, coverage_report, coverage_format
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job_db_id)
        .bind(step_position as i64)
        .bind(&step.name)
        .bind(&step.run)
        .bind(to_json(&step.env)?)
        .bind(enum_to_text(&step.kind))
        .bind(&step.test_report)
        .bind(step.test_format.as_ref().map(enum_to_text))
        .bind(&step.coverage_report)
        .bind(step.coverage_format.as_ref().map(enum_to_text))
        .execute(&mut *conn)
        .await?;
    }

    for (include_position, vars) in job.matrix.include.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO pipeline_job_matrix_includes (pipeline_job_db_id, position, vars_json)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(job_db_id)
        .bind(include_position as i64)
        .bind(to_json(vars)?)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// List all projects with their pipeline ids
pub async fn list_summaries(pool: &SqlitePool) -> Result<Vec<ProjectSummary>, sqlx::Error> {
    let projects = sqlx::query_as::<_, ProjectRow>(
        "SELECT id, name, repo_url, repo_ref, config_file, secrets_json, created_utc, updated_utc FROM projects ORDER BY name ASC",
    )
    .fetch_all(pool)
    .await?;

    let pipelines: Vec<(i64, String)> = sqlx::query_as(
        "SELECT project_id, pipeline_id FROM pipelines ORDER BY project_id ASC, position ASC",
    )
    .fetch_all(pool)
    .await?;

    Ok(projects
        .into_iter()
        .map(|row| ProjectSummary {
            id: row.id,
            pipelines: pipelines
                .iter()
                .filter(|(project_id, _)| *project_id == row.id)
                .map(|(_, pipeline_id)| pipeline_id.clone())
                .collect(),
            name: row.name,
            repo_url: row.repo_url,
        })
        .collect())
}

/// Find a project by ID with its full pipeline tree
pub async fn find_detail(pool: &SqlitePool, id: i64) -> Result<Option<ProjectDetail>, sqlx::Error> {
    let Some(row) = sqlx::query_as::<_, ProjectRow>(
        "SELECT id, name, repo_url, repo_ref, config_file, secrets_json, created_utc, updated_utc FROM projects WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    else {
        return Ok(None);
    };

    let pipeline_rows = sqlx::query_as::<_, PipelineRow>(
        "SELECT id, pipeline_id, source_repo, source_ref FROM pipelines WHERE project_id = ? ORDER BY position ASC",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    let mut pipelines = Vec::with_capacity(pipeline_rows.len());
    for pipeline in pipeline_rows {
        pipelines.push(load_pipeline(pool, pipeline).await?);
    }

    let secrets = from_json(&row.secrets_json);
    Ok(Some(ProjectDetail {
        project: row.into(),
        pipelines,
        secrets,
    }))
}

/// Find the project id owning a pipeline
pub async fn find_pipeline_project(
    pool: &SqlitePool,
    pipeline_db_id: i64,
) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar("SELECT project_id FROM pipelines WHERE id = ?")
        .bind(pipeline_db_id)
        .fetch_optional(pool)
        .await
}

async fn load_pipeline(pool: &SqlitePool, row: PipelineRow) -> Result<PipelineDetail, sqlx::Error> {
    let job_rows = sqlx::query_as::<_, PipelineJobRow>(
        r#"
        SELECT id, job_id, runs_on_json, requires_json, timeout_seconds,
               artifacts_json, caches_json, needs_json
        FROM pipeline_jobs
        WHERE pipeline_db_id = ?
        ORDER BY position ASC
        "#,
    )
    .bind(row.id)
    .fetch_all(pool)
    .await?;

    let mut jobs = Vec::with_capacity(job_rows.len());
    for job_row in job_rows {
        let steps = sqlx::query_as::<_, StepRow>(
            r#"
            SELECT name, run, env_json, kind, test_report, test_format, coverage_report, coverage_format
            FROM pipeline_job_steps
            WHERE pipeline_job_db_id = ?
            ORDER BY position ASC
            "#,
        )
        .bind(job_row.id)
        .fetch_all(pool)
        .await?;

        let includes: Vec<String> = sqlx::query_scalar(
            "SELECT vars_json FROM pipeline_job_matrix_includes WHERE pipeline_job_db_id = ? ORDER BY position ASC",
        )
        .bind(job_row.id)
        .fetch_all(pool)
        .await?;

        jobs.push(PipelineJob {
            id: job_row.job_id,
            runs_on: from_json(&job_row.runs_on_json),
            requires: from_json::<PipelineJobRequirements>(&job_row.requires_json),
            timeout_seconds: job_row.timeout_seconds,
            artifacts: from_json(&job_row.artifacts_json),
            caches: from_json::<Vec<JobCacheSpec>>(&job_row.caches_json),
            needs: from_json(&job_row.needs_json),
            matrix: PipelineMatrix {
                include: includes
                    .iter()
                    .map(|raw| from_json::<BTreeMap<String, String>>(raw))
                    .collect(),
            },
            steps: steps.into_iter().map(|s| s.into()).collect(),
        });
    }

    Ok(PipelineDetail {
        id: row.id,
        pipeline_id: row.pipeline_id,
        source_repo: row.source_repo,
        source_ref: row.source_ref,
        jobs,
    })
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Serde name of a unit enum variant (`run`, `junit-xml`, ...)
fn enum_to_text<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

fn enum_from_text<T: DeserializeOwned>(text: &str) -> Option<T> {
    serde_json::from_value(serde_json::Value::String(text.to_string())).ok()
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ProjectRow {
    id: i64,
    name: String,
    repo_url: String,
    repo_ref: String,
    config_file: String,
    secrets_json: String,
    created_utc: i64,
    updated_utc: i64,
}

impl From<ProjectRow> for Project {
    fn from(row: ProjectRow) -> Self {
        Project {
            id: row.id,
            name: row.name,
            repo_url: row.repo_url,
            repo_ref: row.repo_ref,
            config_file: row.config_file,
            created_utc: from_micros(row.created_utc),
            updated_utc: from_micros(row.updated_utc),
        }
    }
}

#[derive(sqlx::FromRow)]
struct PipelineRow {
    id: i64,
    pipeline_id: String,
    source_repo: String,
    source_ref: String,
}

#[derive(sqlx::FromRow)]
struct PipelineJobRow {
    id: i64,
    job_id: String,
    runs_on_json: String,
    requires_json: String,
    timeout_seconds: i64,
    artifacts_json: String,
    caches_json: String,
    needs_json: String,
}

#[derive(sqlx::FromRow)]
struct StepRow {
    name: String,
    run: String,
    env_json: String,
    kind: String,
    test_report: Option<String>,
    test_format: Option<String>,
    coverage_report: Option<String>,
    coverage_format: Option<String>,
}

impl From<StepRow> for PipelineStep {
    fn from(row: StepRow) -> Self {
        PipelineStep {
            name: row.name,
            run: row.run,
            env: from_json(&row.env_json),
            kind: enum_from_text::<StepKind>(&row.kind).unwrap_or_default(),
            test_report: row.test_report,
            test_format: row
                .test_format
                .as_deref()
                .and_then(enum_from_text::<TestReportFormat>),
            coverage_report: row.coverage_report,
            coverage_format: row
                .coverage_format
                .as_deref()
                .and_then(enum_from_text::<CoverageFormat>),
        }
    }
}

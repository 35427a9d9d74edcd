use std::future::Future;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};

/// Attempts made by a write before a busy error is returned
const WRITE_ATTEMPTS: u32 = 3;
const BUSY_BACKOFF: Duration = Duration::from_millis(100);

pub async fn create_pool(path: &Path) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    SqlitePoolOptions::new()
        .max_connections(8)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // Job executions
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_executions (
            id TEXT PRIMARY KEY,
            script TEXT NOT NULL DEFAULT '',
            step_plan_json TEXT NOT NULL DEFAULT '[]',
            env_json TEXT NOT NULL DEFAULT '{}',
            required_caps_json TEXT NOT NULL DEFAULT '{}',
            timeout_seconds INTEGER NOT NULL DEFAULT 0,
            source_repo TEXT NOT NULL DEFAULT '',
            source_ref TEXT NOT NULL DEFAULT '',
            artifact_globs_json TEXT NOT NULL DEFAULT '[]',
            caches_json TEXT NOT NULL DEFAULT '[]',
            metadata_json TEXT NOT NULL DEFAULT '{}',
            sensitive_values_json TEXT NOT NULL DEFAULT '[]',
            status TEXT NOT NULL,
            created_utc INTEGER NOT NULL,
            leased_utc INTEGER,
            started_utc INTEGER,
            finished_utc INTEGER,
            leased_by_agent_id TEXT NOT NULL DEFAULT '',
            exit_code INTEGER,
            error TEXT NOT NULL DEFAULT '',
            output TEXT NOT NULL DEFAULT '',
            current_step TEXT NOT NULL DEFAULT '',
            cache_stats_json TEXT NOT NULL DEFAULT '[]',
            runtime_caps_json TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_executions_status ON job_executions(status, created_utc)")
        .execute(pool)
        .await?;

    // Job events
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id TEXT NOT NULL REFERENCES job_executions(id) ON DELETE CASCADE,
            event_type TEXT NOT NULL,
            utc INTEGER NOT NULL,
            step_index INTEGER NOT NULL DEFAULT 0,
            step_name TEXT NOT NULL DEFAULT '',
            message TEXT NOT NULL DEFAULT ''
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_events_job_id ON job_events(job_id, id)")
        .execute(pool)
        .await?;

    // Artifact index and test reports
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_artifacts (
            job_id TEXT NOT NULL REFERENCES job_executions(id) ON DELETE CASCADE,
            path TEXT NOT NULL,
            stored_rel TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            PRIMARY KEY (job_id, path)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_test_reports (
            job_id TEXT PRIMARY KEY REFERENCES job_executions(id) ON DELETE CASCADE,
            report_json TEXT NOT NULL,
            updated_utc INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Project tree
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            repo_url TEXT NOT NULL DEFAULT '',
            repo_ref TEXT NOT NULL DEFAULT '',
            config_file TEXT NOT NULL DEFAULT '',
            secrets_json TEXT NOT NULL DEFAULT '[]',
            created_utc INTEGER NOT NULL,
            updated_utc INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipelines (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            pipeline_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            source_repo TEXT NOT NULL DEFAULT '',
            source_ref TEXT NOT NULL DEFAULT '',
            UNIQUE (project_id, pipeline_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pipeline_db_id INTEGER NOT NULL REFERENCES pipelines(id) ON DELETE CASCADE,
            job_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            runs_on_json TEXT NOT NULL DEFAULT '{}',
            requires_json TEXT NOT NULL DEFAULT '{}',
            timeout_seconds INTEGER NOT NULL DEFAULT 0,
            artifacts_json TEXT NOT NULL DEFAULT '[]',
            caches_json TEXT NOT NULL DEFAULT '[]',
            needs_json TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_job_steps (
            pipeline_job_db_id INTEGER NOT NULL REFERENCES pipeline_jobs(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            name TEXT NOT NULL DEFAULT '',
            run TEXT NOT NULL DEFAULT '',
            env_json TEXT NOT NULL DEFAULT '{}',
            kind TEXT NOT NULL DEFAULT 'run',
            test_report TEXT,
            test_format TEXT,
            coverage_report TEXT,
            coverage_format TEXT,
            PRIMARY KEY (pipeline_job_db_id, position)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_job_matrix_includes (
            pipeline_job_db_id INTEGER NOT NULL REFERENCES pipeline_jobs(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            vars_json TEXT NOT NULL DEFAULT '{}',
            PRIMARY KEY (pipeline_job_db_id, position)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Secrets and app state
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vault_connections (
            name TEXT PRIMARY KEY,
            url TEXT NOT NULL DEFAULT '',
            auth_method TEXT NOT NULL DEFAULT '',
            role_id TEXT NOT NULL DEFAULT '',
            secret_id_env TEXT NOT NULL DEFAULT '',
            updated_utc INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS app_state (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_utc INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}

/// Runs a write, retrying while SQLite reports the database busy or locked
///
/// Back-off doubles from 100 ms. Non-busy errors return immediately.
pub async fn retry_busy<T, F, Fut>(mut op: F) -> Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    let mut delay = BUSY_BACKOFF;
    let mut attempt = 1;
    loop {
        match op().await {
            Err(err) if is_busy(&err) && attempt < WRITE_ATTEMPTS => {
                tracing::debug!(attempt, "Database busy, retrying in {:?}", delay);
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// SQLITE_BUSY (5) / SQLITE_LOCKED (6), including their extended codes
pub fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            let primary = db
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| code & 0xff);
            matches!(primary, Some(5) | Some(6))
        }
        _ => false,
    }
}

// =============================================================================
// Timestamp and JSON column helpers
// =============================================================================

/// Timestamps are stored as unix microseconds so they order numerically
pub fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

pub fn from_micros(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or_default()
}

pub fn to_json<T: serde::Serialize>(value: &T) -> Result<String, sqlx::Error> {
    serde_json::to_string(value).map_err(|e| sqlx::Error::Encode(Box::new(e)))
}

/// Lenient decode: a malformed column yields the type's default
pub fn from_json<T: serde::de::DeserializeOwned + Default>(raw: &str) -> T {
    serde_json::from_str(raw).unwrap_or_default()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Fresh migrated database in a temp dir; keep the dir alive for the test
    pub async fn temp_pool() -> (tempfile::TempDir, SqlitePool) {
        let dir = tempfile::tempdir().expect("tempdir");
        let pool = create_pool(&dir.path().join("ciwi.db"))
            .await
            .expect("pool");
        run_migrations(&pool).await.expect("migrations");
        (dir, pool)
    }
}

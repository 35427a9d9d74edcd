//! Artifact Repository
//!
//! Index of artifact bytes stored on disk: `(job_id, path) -> stored_rel, size`.

use sqlx::SqlitePool;

use crate::db::retry_busy;

/// One indexed artifact
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ArtifactRecord {
    pub path: String,
    pub stored_rel: String,
    pub size_bytes: i64,
}

/// Replace the artifact index of a job in one transaction
pub async fn replace_for_job(
    pool: &SqlitePool,
    job_id: &str,
    records: &[ArtifactRecord],
) -> Result<(), sqlx::Error> {
    retry_busy(|| replace_for_job_once(pool, job_id, records)).await
}

async fn replace_for_job_once(
    pool: &SqlitePool,
    job_id: &str,
    records: &[ArtifactRecord],
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM job_artifacts WHERE job_id = ?")
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

    for record in records {
        sqlx::query(
            r#"
            INSERT INTO job_artifacts (job_id, path, stored_rel, size_bytes)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(job_id)
        .bind(&record.path)
        .bind(&record.stored_rel)
        .bind(record.size_bytes)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Artifacts of a job ordered by path
pub async fn list_for_job(
    pool: &SqlitePool,
    job_id: &str,
) -> Result<Vec<ArtifactRecord>, sqlx::Error> {
    sqlx::query_as::<_, ArtifactRecord>(
        "SELECT path, stored_rel, size_bytes FROM job_artifacts WHERE job_id = ? ORDER BY path ASC",
    )
    .bind(job_id)
    .fetch_all(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::temp_pool;
    use crate::repository::job_repository;
    use ciwi_core::domain::job::JobExecution;

    fn record(path: &str) -> ArtifactRecord {
        ArtifactRecord {
            path: path.to_string(),
            stored_rel: format!("job-1/{path}"),
            size_bytes: 3,
        }
    }

    #[tokio::test]
    async fn test_upload_replaces_index() {
        let (_dir, pool) = temp_pool().await;
        let job = JobExecution {
            id: "job-1".to_string(),
            script: "true".to_string(),
            ..Default::default()
        };
        job_repository::insert(&pool, &job).await.unwrap();

        replace_for_job(&pool, "job-1", &[record("b.txt"), record("a.txt")])
            .await
            .unwrap();
        replace_for_job(&pool, "job-1", &[record("c.txt")]).await.unwrap();

        let listed = list_for_job(&pool, "job-1").await.unwrap();
        assert_eq!(listed, vec![record("c.txt")]);
    }
}

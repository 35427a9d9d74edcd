//! Vault Connection Repository

use chrono::Utc;
use ciwi_core::domain::project::VaultConnection;
use sqlx::SqlitePool;

use crate::db::{retry_busy, to_micros};

/// Insert or update a vault connection by name
pub async fn upsert(pool: &SqlitePool, conn: &VaultConnection) -> Result<(), sqlx::Error> {
    let now = to_micros(Utc::now());

    retry_busy(|| {
        sqlx::query(
            r#"
            INSERT INTO vault_connections (name, url, auth_method, role_id, secret_id_env, updated_utc)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                url = excluded.url,
                auth_method = excluded.auth_method,
                role_id = excluded.role_id,
                secret_id_env = excluded.secret_id_env,
                updated_utc = excluded.updated_utc
            "#,
        )
        .bind(&conn.name)
        .bind(&conn.url)
        .bind(&conn.auth_method)
        .bind(&conn.role_id)
        .bind(&conn.secret_id_env)
        .bind(now)
        .execute(pool)
    })
    .await?;

    Ok(())
}

/// List all vault connections
pub async fn list(pool: &SqlitePool) -> Result<Vec<VaultConnection>, sqlx::Error> {
    let rows = sqlx::query_as::<_, VaultRow>(
        "SELECT name, url, auth_method, role_id, secret_id_env FROM vault_connections ORDER BY name ASC",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Find a vault connection by name
pub async fn find_by_name(
    pool: &SqlitePool,
    name: &str,
) -> Result<Option<VaultConnection>, sqlx::Error> {
    let row = sqlx::query_as::<_, VaultRow>(
        "SELECT name, url, auth_method, role_id, secret_id_env FROM vault_connections WHERE name = ?",
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

#[derive(sqlx::FromRow)]
struct VaultRow {
    name: String,
    url: String,
    auth_method: String,
    role_id: String,
    secret_id_env: String,
}

impl From<VaultRow> for VaultConnection {
    fn from(row: VaultRow) -> Self {
        VaultConnection {
            name: row.name,
            url: row.url,
            auth_method: row.auth_method,
            role_id: row.role_id,
            secret_id_env: row.secret_id_env,
        }
    }
}

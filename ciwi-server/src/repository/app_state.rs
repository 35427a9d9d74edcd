//! App-State Repository
//!
//! Free-form key/value rows that survive restarts (self-update progress).

use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::{retry_busy, to_micros};

pub const UPDATE_STATUS: &str = "update_status";
pub const UPDATE_TARGET: &str = "update_target";
pub const UPDATE_MESSAGE: &str = "update_message";

/// Set a key
pub async fn set(pool: &SqlitePool, key: &str, value: &str) -> Result<(), sqlx::Error> {
    let now = to_micros(Utc::now());

    retry_busy(|| {
        sqlx::query(
            r#"
            INSERT INTO app_state (key, value, updated_utc)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_utc = excluded.updated_utc
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(pool)
    })
    .await?;

    Ok(())
}

/// Get a key
pub async fn get(pool: &SqlitePool, key: &str) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT value FROM app_state WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await
}

//! Secret Service
//!
//! Resolves per-project secret specs into values at trigger time. The
//! vault backend itself lives outside the server; the resolver trait is the
//! seam it plugs into.

use async_trait::async_trait;
use ciwi_core::domain::project::{ProjectSecretSpec, VaultConnection};
use sqlx::SqlitePool;
use thiserror::Error;

use crate::repository::vault_repository;

/// Errors raised while resolving secrets
#[derive(Debug, Error)]
pub enum SecretError {
    #[error("{0}")]
    Validation(String),
    #[error("secret {0} could not be resolved")]
    Missing(String),
    #[error("vault connection {0} not found")]
    UnknownConnection(String),
    #[error("secret backend error: {0}")]
    Backend(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Turns a secret spec into its value
#[async_trait]
pub trait SecretResolver: Send + Sync {
    async fn resolve(
        &self,
        connection: Option<&VaultConnection>,
        spec: &ProjectSecretSpec,
    ) -> Result<String, SecretError>;
}

/// Reads `CIWI_SECRET_<NAME>` from the server environment
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSecretResolver;

impl EnvSecretResolver {
    /// Environment variable consulted for a secret name
    pub fn env_key(name: &str) -> String {
        let sanitized: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("CIWI_SECRET_{sanitized}")
    }
}

#[async_trait]
impl SecretResolver for EnvSecretResolver {
    async fn resolve(
        &self,
        _connection: Option<&VaultConnection>,
        spec: &ProjectSecretSpec,
    ) -> Result<String, SecretError> {
        std::env::var(Self::env_key(&spec.name))
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| SecretError::Missing(spec.name.clone()))
    }
}

/// Resolve every spec, returning `(env name, value)` pairs in spec order
pub async fn resolve_all(
    pool: &SqlitePool,
    resolver: &dyn SecretResolver,
    specs: &[ProjectSecretSpec],
) -> Result<Vec<(String, String)>, SecretError> {
    let mut resolved = Vec::with_capacity(specs.len());

    for spec in specs {
        let connection = if spec.vault_connection.is_empty() {
            None
        } else {
            Some(
                vault_repository::find_by_name(pool, &spec.vault_connection)
                    .await?
                    .ok_or_else(|| SecretError::UnknownConnection(spec.vault_connection.clone()))?,
            )
        };

        let value = resolver.resolve(connection.as_ref(), spec).await?;
        resolved.push((spec.name.clone(), value));
    }

    Ok(resolved)
}

/// Store a vault connection
pub async fn save_connection(pool: &SqlitePool, conn: &VaultConnection) -> Result<(), SecretError> {
    if conn.name.trim().is_empty() {
        return Err(SecretError::Validation(
            "vault connection name is required".to_string(),
        ));
    }
    vault_repository::upsert(pool, conn).await?;
    tracing::info!(name = %conn.name, "Vault connection saved");
    Ok(())
}

/// List stored vault connections
pub async fn list_connections(pool: &SqlitePool) -> Result<Vec<VaultConnection>, SecretError> {
    Ok(vault_repository::list(pool).await?)
}

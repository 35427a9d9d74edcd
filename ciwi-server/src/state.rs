//! Shared handler state

use std::sync::Arc;

use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

use crate::SharedSecretResolver;
use crate::config::ServerConfig;
use crate::service::agent::AgentRegistry;
use crate::service::secret::EnvSecretResolver;

/// State handed to every handler and background task
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<ServerConfig>,
    pub agents: Arc<AgentRegistry>,
    pub secrets: SharedSecretResolver,
    /// Cancelled to stop the server (also used by self-update)
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(pool: SqlitePool, config: ServerConfig, shutdown: CancellationToken) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            agents: Arc::new(AgentRegistry::new()),
            secrets: Arc::new(EnvSecretResolver),
            shutdown,
        }
    }

    pub fn with_secret_resolver(mut self, secrets: SharedSecretResolver) -> Self {
        self.secrets = secrets;
        self
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::db::testing::temp_pool;

    /// State over a fresh database, artifacts under the same temp dir
    pub async fn test_state() -> (tempfile::TempDir, AppState) {
        let (dir, pool) = temp_pool().await;
        let config = ServerConfig {
            artifacts_dir: dir.path().join("artifacts"),
            ..Default::default()
        };
        (dir, AppState::new(pool, config, CancellationToken::new()))
    }
}

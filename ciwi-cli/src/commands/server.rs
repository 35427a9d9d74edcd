use std::path::PathBuf;

use anyhow::Result;
use ciwi_server::ServerConfig;
use clap::Args;
use tokio_util::sync::CancellationToken;

/// Server flags; unset flags keep the environment/default value
#[derive(Args, Debug, Clone, Default)]
pub struct ServerArgs {
    /// Listen address
    #[arg(long, env = "CIWI_SERVER_ADDR")]
    pub addr: Option<String>,

    /// SQLite database file
    #[arg(long, env = "CIWI_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Directory artifacts are stored in
    #[arg(long, env = "CIWI_ARTIFACTS_DIR")]
    pub artifacts_dir: Option<PathBuf>,
}

impl ServerArgs {
    /// Applies the flags over `base`
    pub fn apply(self, mut base: ServerConfig) -> ServerConfig {
        if let Some(addr) = self.addr {
            base.addr = addr;
        }
        if let Some(db_path) = self.db_path {
            base.db_path = db_path;
        }
        if let Some(artifacts_dir) = self.artifacts_dir {
            base.artifacts_dir = artifacts_dir;
        }
        base
    }
}

pub async fn handle_server_command(args: ServerArgs, shutdown: CancellationToken) -> Result<()> {
    let config = args.apply(ServerConfig::from_env());
    tracing::info!(addr = %config.addr, "Starting ciwi server");
    ciwi_server::run(config, shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_base() {
        let args = ServerArgs {
            addr: Some("127.0.0.1:9000".to_string()),
            db_path: None,
            artifacts_dir: Some(PathBuf::from("/srv/artifacts")),
        };
        let config = args.apply(ServerConfig::default());
        assert_eq!(config.addr, "127.0.0.1:9000");
        assert_eq!(config.db_path, PathBuf::from("ciwi.db"));
        assert_eq!(config.artifacts_dir, PathBuf::from("/srv/artifacts"));
    }
}

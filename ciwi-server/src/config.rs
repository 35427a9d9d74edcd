//! Server configuration
//!
//! Defines the listen address, storage locations, sweeper timing and the
//! self-update source of the server.

use std::path::PathBuf;
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address (e.g., "0.0.0.0:8112")
    pub addr: String,

    /// SQLite database file
    pub db_path: PathBuf,

    /// Root directory for artifact bytes, keyed by job id
    pub artifacts_dir: PathBuf,

    /// How often the maintenance sweeper runs
    pub maintenance_interval: Duration,

    /// Leased jobs older than this are requeued
    pub lease_max_age: Duration,

    /// Grace added to a running job's timeout before the sweeper fails it
    pub timeout_grace: Duration,

    /// Period between WatchState snapshots
    pub state_stream_interval: Duration,

    /// Service unit/label the server runs under, if any
    pub service_name: String,

    /// Where a platform-staged update manifest is written
    pub staged_manifest: Option<PathBuf>,

    /// Release repository for self-updates ("owner/name")
    pub update_repository: String,

    /// Release API base URL
    pub update_api_base: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8112".to_string(),
            db_path: PathBuf::from("ciwi.db"),
            artifacts_dir: PathBuf::from("ciwi-artifacts"),
            maintenance_interval: Duration::from_secs(10),
            lease_max_age: Duration::from_secs(90),
            timeout_grace: Duration::from_secs(5),
            state_stream_interval: Duration::from_secs(2),
            service_name: String::new(),
            staged_manifest: None,
            update_repository: "izzyreal/ciwi".to_string(),
            update_api_base: "https://api.github.com".to_string(),
        }
    }
}

impl ServerConfig {
    /// Creates configuration from environment variables
    ///
    /// Recognised variables:
    /// - CIWI_SERVER_ADDR (default: 0.0.0.0:8112)
    /// - CIWI_DB_PATH (default: ciwi.db)
    /// - CIWI_ARTIFACTS_DIR (default: ciwi-artifacts)
    /// - CIWI_MAINTENANCE_INTERVAL_SECS (default: 10)
    /// - CIWI_LEASE_MAX_AGE_SECS (default: 90)
    /// - CIWI_SERVER_SERVICE_NAME
    /// - CIWI_UPDATE_STAGED_MANIFEST
    /// - CIWI_UPDATE_REPOSITORY (default: izzyreal/ciwi)
    /// - CIWI_UPDATE_API_BASE (default: https://api.github.com)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let addr = env_string("CIWI_SERVER_ADDR").unwrap_or(defaults.addr);
        let db_path = env_string("CIWI_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);
        let artifacts_dir = env_string("CIWI_ARTIFACTS_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.artifacts_dir);

        let maintenance_interval = env_secs("CIWI_MAINTENANCE_INTERVAL_SECS")
            .unwrap_or(defaults.maintenance_interval);
        let lease_max_age =
            env_secs("CIWI_LEASE_MAX_AGE_SECS").unwrap_or(defaults.lease_max_age);

        Self {
            addr,
            db_path,
            artifacts_dir,
            maintenance_interval,
            lease_max_age,
            service_name: env_string("CIWI_SERVER_SERVICE_NAME").unwrap_or_default(),
            staged_manifest: env_string("CIWI_UPDATE_STAGED_MANIFEST").map(PathBuf::from),
            update_repository: env_string("CIWI_UPDATE_REPOSITORY")
                .unwrap_or(defaults.update_repository),
            update_api_base: env_string("CIWI_UPDATE_API_BASE")
                .unwrap_or(defaults.update_api_base),
            ..defaults
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.addr.trim().is_empty() {
            anyhow::bail!("addr cannot be empty");
        }

        if self.db_path.as_os_str().is_empty() {
            anyhow::bail!("db_path cannot be empty");
        }

        if self.maintenance_interval.is_zero() {
            anyhow::bail!("maintenance_interval must be greater than 0");
        }

        if self.lease_max_age.is_zero() {
            anyhow::bail!("lease_max_age must be greater than 0");
        }

        if self.state_stream_interval.is_zero() {
            anyhow::bail!("state_stream_interval must be greater than 0");
        }

        Ok(())
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_string(key)
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|s| *s > 0)
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.addr, "0.0.0.0:8112");
        assert_eq!(config.lease_max_age, Duration::from_secs(90));
        assert_eq!(config.timeout_grace, Duration::from_secs(5));
    }

    #[test]
    fn test_validate_rejects_zero_intervals() {
        let config = ServerConfig {
            maintenance_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            addr: "  ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}

//! Process-wide configuration
//!
//! Role configuration lives in each role's crate (`ServerConfig`,
//! `AgentConfig`, `UpdateSettings`); this module only sets up logging.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when neither RUST_LOG nor CIWI_LOG_LEVEL is set
pub const DEFAULT_FILTER: &str = "ciwi=info,tower_http=info";

/// Installs the tracing subscriber
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var("CIWI_LOG_LEVEL").ok();
        EnvFilter::new(fallback_filter(level.as_deref()))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Filter directives for a CIWI_LOG_LEVEL value
///
/// Unknown levels fall back to the default filter.
pub fn fallback_filter(level: Option<&str>) -> String {
    match level.map(|l| l.trim().to_ascii_lowercase()).as_deref() {
        Some(level @ ("trace" | "debug" | "info" | "warn" | "error")) => {
            format!("ciwi={level},tower_http=info")
        }
        _ => DEFAULT_FILTER.to_string(),
    }
}

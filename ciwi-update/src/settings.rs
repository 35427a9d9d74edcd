//! Update settings

use std::path::PathBuf;

/// Settings shared by the agent and server updaters
#[derive(Debug, Clone)]
pub struct UpdateSettings {
    /// Release repository ("owner/name")
    pub repository: String,

    /// Release API base URL
    pub api_base: String,

    /// Overrides the checksum listing asset name
    pub checksum_asset: Option<String>,

    /// Refuse updates whose release carries no checksum listing
    pub require_checksum: bool,

    /// Directory staged binaries are written to
    pub staging_dir: PathBuf,

    /// Where a platform-staged manifest is written
    pub staged_manifest: PathBuf,

    /// Unit (systemd) or label (launchd) of the running service
    pub service_name: String,

    pub systemctl_path: PathBuf,
    pub launchctl_path: PathBuf,
    pub codesign_path: PathBuf,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        let staging_dir = std::env::temp_dir().join("ciwi-update");
        Self {
            repository: "izzyreal/ciwi".to_string(),
            api_base: "https://api.github.com".to_string(),
            checksum_asset: None,
            require_checksum: true,
            staged_manifest: staging_dir.join("pending.json"),
            staging_dir,
            service_name: String::new(),
            systemctl_path: PathBuf::from("systemctl"),
            launchctl_path: PathBuf::from("launchctl"),
            codesign_path: PathBuf::from("codesign"),
        }
    }
}

impl UpdateSettings {
    /// Creates settings from environment variables
    ///
    /// Recognised variables:
    /// - CIWI_UPDATE_REPOSITORY, CIWI_UPDATE_API_BASE
    /// - CIWI_UPDATE_CHECKSUM_ASSET
    /// - CIWI_UPDATE_REQUIRE_CHECKSUM (default: true)
    /// - CIWI_UPDATE_STAGING_DIR, CIWI_UPDATE_STAGED_MANIFEST
    /// - CIWI_SYSTEMCTL_PATH, CIWI_LAUNCHCTL_PATH, CIWI_CODESIGN_PATH
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());

        let staging_dir = var("CIWI_UPDATE_STAGING_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.staging_dir);
        let staged_manifest = var("CIWI_UPDATE_STAGED_MANIFEST")
            .map(PathBuf::from)
            .unwrap_or_else(|| staging_dir.join("pending.json"));

        Self {
            repository: var("CIWI_UPDATE_REPOSITORY").unwrap_or(defaults.repository),
            api_base: var("CIWI_UPDATE_API_BASE").unwrap_or(defaults.api_base),
            checksum_asset: var("CIWI_UPDATE_CHECKSUM_ASSET"),
            require_checksum: var("CIWI_UPDATE_REQUIRE_CHECKSUM")
                .map(|v| parse_bool(&v))
                .unwrap_or(defaults.require_checksum),
            staging_dir,
            staged_manifest,
            service_name: defaults.service_name,
            systemctl_path: var("CIWI_SYSTEMCTL_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.systemctl_path),
            launchctl_path: var("CIWI_LAUNCHCTL_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.launchctl_path),
            codesign_path: var("CIWI_CODESIGN_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.codesign_path),
        }
    }

    /// Checksum listing names to look for, override first
    pub fn checksum_candidates(&self) -> Vec<String> {
        match &self.checksum_asset {
            Some(name) => vec![name.clone()],
            None => crate::asset::CHECKSUM_ASSETS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

fn parse_bool(raw: &str) -> bool {
    !matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}

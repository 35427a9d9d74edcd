//! Release discovery
//!
//! Looks up tagged releases and downloads their assets from a GitHub-style
//! releases API.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::{Result, UpdateError};

/// A published release
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Release {
    pub tag_name: String,
    pub assets: Vec<ReleaseAsset>,
}

/// One downloadable file of a release
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
    pub size: u64,
}

impl Release {
    pub fn find_asset(&self, name: &str) -> Option<&ReleaseAsset> {
        self.assets.iter().find(|a| a.name == name)
    }
}

/// Where releases come from
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Release published under `tag`
    async fn release_by_tag(&self, tag: &str) -> Result<Release>;

    /// Body of a release asset
    async fn download(&self, asset: &ReleaseAsset) -> Result<Vec<u8>>;
}

/// GitHub releases API client
#[derive(Debug, Clone)]
pub struct GithubReleases {
    client: Client,
    api_base: String,
    repository: String,
}

impl GithubReleases {
    /// `repository` is `owner/name`
    pub fn new(api_base: impl Into<String>, repository: impl Into<String>) -> Self {
        let client = Client::builder()
            .user_agent(concat!("ciwi-updater/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            repository: repository.into(),
        }
    }

    fn tag_url(&self, tag: &str) -> String {
        format!(
            "{}/repos/{}/releases/tags/{}",
            self.api_base, self.repository, tag
        )
    }
}

#[async_trait]
impl ReleaseSource for GithubReleases {
    async fn release_by_tag(&self, tag: &str) -> Result<Release> {
        let url = self.tag_url(tag);
        tracing::debug!(url = %url, "Fetching release");

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(UpdateError::ReleaseNotFound(tag.to_string()));
        }

        Ok(response.error_for_status()?.json().await?)
    }

    async fn download(&self, asset: &ReleaseAsset) -> Result<Vec<u8>> {
        tracing::debug!(asset = %asset.name, "Downloading release asset");

        let response = self
            .client
            .get(&asset.browser_download_url)
            .header("Accept", "application/octet-stream")
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_url() {
        let releases = GithubReleases::new("https://api.github.com/", "izzyreal/ciwi");
        assert_eq!(
            releases.tag_url("v1.2.3"),
            "https://api.github.com/repos/izzyreal/ciwi/releases/tags/v1.2.3"
        );
    }

    #[test]
    fn test_release_deserializes_github_payload() {
        let json = r#"{
            "tag_name": "v2.0.0",
            "name": "ciwi v2.0.0",
            "assets": [
                {"name": "ciwi-linux-amd64", "browser_download_url": "https://x/a", "size": 10, "id": 1}
            ]
        }"#;
        let release: Release = serde_json::from_str(json).unwrap();
        assert_eq!(release.tag_name, "v2.0.0");
        assert!(release.find_asset("ciwi-linux-amd64").is_some());
        assert!(release.find_asset("checksums.txt").is_none());
    }
}

//! ciwi self-update
//!
//! Replaces the running agent or server binary with a released version:
//!
//! - resolve the release asset for this host (`ciwi-<os>-<arch>[.exe]`)
//! - download it and verify its SHA-256 against the release checksum listing
//! - under systemd or launchd, stage a manifest for the privileged updater
//!   unit; otherwise start a helper copy of the binary that swaps the file
//!   once this process has exited and relaunches it
//!
//! # Example
//!
//! ```no_run
//! use ciwi_update::{UpdateOutcome, UpdateSettings, Updater};
//!
//! # async fn run() -> Result<(), ciwi_update::UpdateError> {
//! let updater = Updater::new(UpdateSettings::from_env(), "v1.0.0")?;
//! if let UpdateOutcome::HelperStarted { exit_after, .. } =
//!     updater.update_to("v1.1.0", vec!["agent".to_string()]).await?
//! {
//!     tokio::time::sleep(exit_after).await;
//!     std::process::exit(0);
//! }
//! # Ok(())
//! # }
//! ```

pub mod asset;
pub mod checksum;
pub mod error;
pub mod helper;
pub mod manifest;
pub mod release;
pub mod service;
pub mod settings;
pub mod updater;

pub use error::UpdateError;
pub use helper::HelperArgs;
pub use manifest::StagedManifest;
pub use settings::UpdateSettings;
pub use updater::{UpdateOutcome, Updater};

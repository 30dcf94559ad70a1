//! Configuration for the CLI
//!
//! Staging location plus the core's publish and Hub settings, all loaded
//! from the environment (a `.env` file is read first by `main`).

use crate::error::{CliError, Result};
use bids_hub_core::publish::{Destination, HubConfig, PublishConfig};
use std::path::PathBuf;

// ============================================================================
// CLI Configuration Constants
// ============================================================================

/// Directory under the user cache dir that holds staging sessions
pub const STAGING_SUBDIR: &str = "bids-hub/staging";

/// Fallback when no cache directory can be determined
pub const LOCAL_STAGING_DIR: &str = ".bids-hub-staging";

#[derive(Debug, Clone)]
pub struct Config {
    /// Parent of every session directory
    pub staging_dir: PathBuf,
    pub publish: PublishConfig,
    pub hub: HubConfig,
}

impl Config {
    pub fn new() -> Result<Self> {
        let staging_dir = dirs::cache_dir()
            .ok_or_else(|| CliError::config("Could not determine cache directory"))?
            .join(STAGING_SUBDIR);

        Ok(Self {
            staging_dir,
            publish: PublishConfig::default(),
            hub: HubConfig::default(),
        })
    }

    /// Defaults overlaid with `BIDS_HUB_STAGING_DIR`, `BIDS_HUB_*` publish
    /// settings and the Hub connection variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::new().unwrap_or_default();

        if let Ok(dir) = std::env::var("BIDS_HUB_STAGING_DIR") {
            config.staging_dir = PathBuf::from(dir);
        }
        config.publish = PublishConfig::from_env();
        config.hub = HubConfig::from_env();

        Ok(config)
    }

    /// A flag given on the command line wins over the environment
    pub fn with_staging_dir(mut self, dir: Option<PathBuf>) -> Self {
        if let Some(dir) = dir {
            self.staging_dir = dir;
        }
        self
    }

    pub fn with_revision(mut self, revision: Option<String>) -> Self {
        if let Some(revision) = revision {
            self.hub = self.hub.with_revision(revision);
        }
        self
    }

    pub fn destination(&self, repo_id: &str) -> Destination {
        Destination::new(repo_id).with_revision(self.hub.revision.clone())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self {
            staging_dir: PathBuf::from(LOCAL_STAGING_DIR),
            publish: PublishConfig::default(),
            hub: HubConfig::default(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let config = Config::default()
            .with_staging_dir(Some(PathBuf::from("/scratch/sessions")))
            .with_revision(Some("refs/pr/3".to_string()));

        assert_eq!(config.staging_dir, PathBuf::from("/scratch/sessions"));
        let destination = config.destination("lab/arc");
        assert_eq!(destination.repo_id, "lab/arc");
        assert_eq!(destination.revision, "refs/pr/3");
    }

    #[test]
    fn test_absent_flags_keep_configured_values() {
        let defaults = Config::default();
        let config = defaults.clone().with_staging_dir(None).with_revision(None);
        assert_eq!(config.staging_dir, defaults.staging_dir);
        assert_eq!(config.destination("lab/arc").revision, "main");
    }
}

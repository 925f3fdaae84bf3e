//! Runtime configuration.
//!
//! Layered: `packsmith.toml` (optional) provides the base, environment
//! variables override it. Every field has a default so a bare checkout
//! runs without a config file.
//!
//! ```toml
//! db_path = "packsmith.db"
//! github_api_base = "https://api.github.com"
//! request_timeout_secs = 30
//! ref_read_attempts = 5
//! ref_read_backoff_ms = 500
//! private_repos = true
//! generation_mode = "sequential"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::generator::GenerationMode;
use crate::publisher::PublishConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacksmithConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Repository host API base. Overridable for tests and GHE setups.
    #[serde(default = "default_github_api_base")]
    pub github_api_base: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_ref_read_attempts")]
    pub ref_read_attempts: u32,

    #[serde(default = "default_ref_read_backoff_ms")]
    pub ref_read_backoff_ms: u64,

    #[serde(default = "default_private_repos")]
    pub private_repos: bool,

    #[serde(default)]
    pub generation_mode: GenerationMode,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("packsmith.db")
}

fn default_github_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_ref_read_attempts() -> u32 {
    5
}

fn default_ref_read_backoff_ms() -> u64 {
    500
}

fn default_private_repos() -> bool {
    true
}

impl Default for PacksmithConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            github_api_base: default_github_api_base(),
            request_timeout_secs: default_request_timeout_secs(),
            ref_read_attempts: default_ref_read_attempts(),
            ref_read_backoff_ms: default_ref_read_backoff_ms(),
            private_repos: default_private_repos(),
            generation_mode: GenerationMode::default(),
        }
    }
}

impl PacksmithConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config: Self = toml::from_str(&content).context("Failed to parse packsmith.toml")?;
        config.apply_env();
        Ok(config)
    }

    /// Load `packsmith.toml` from the working directory if present, else
    /// defaults. Environment overrides apply either way.
    pub fn load_or_default() -> Result<Self> {
        let path = Path::new("packsmith.toml");
        if path.exists() {
            Self::load(path)
        } else {
            let mut config = Self::default();
            config.apply_env();
            Ok(config)
        }
    }

    fn apply_env(&mut self) {
        if let Ok(db) = std::env::var("PACKSMITH_DB") {
            self.db_path = PathBuf::from(db);
        }
        if let Ok(base) = std::env::var("PACKSMITH_GITHUB_API") {
            self.github_api_base = base;
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn publish_config(&self) -> PublishConfig {
        PublishConfig {
            ref_read_attempts: self.ref_read_attempts,
            ref_read_backoff: Duration::from_millis(self.ref_read_backoff_ms),
            private_repos: self.private_repos,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PacksmithConfig::default();
        assert_eq!(config.db_path, PathBuf::from("packsmith.db"));
        assert_eq!(config.github_api_base, "https://api.github.com");
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.ref_read_attempts, 5);
        assert_eq!(config.ref_read_backoff_ms, 500);
        assert!(config.private_repos);
        assert_eq!(config.generation_mode, GenerationMode::Sequential);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: PacksmithConfig =
            toml::from_str("db_path = \"custom.db\"\ngeneration_mode = \"fanout\"\n").unwrap();
        assert_eq!(config.db_path, PathBuf::from("custom.db"));
        assert_eq!(config.generation_mode, GenerationMode::Fanout);
        assert_eq!(config.ref_read_attempts, 5);
    }

    #[test]
    fn test_empty_toml_is_all_defaults() {
        let config: PacksmithConfig = toml::from_str("").unwrap();
        assert_eq!(config.github_api_base, "https://api.github.com");
    }

    #[test]
    fn test_invalid_mode_is_rejected() {
        let result: Result<PacksmithConfig, _> = toml::from_str("generation_mode = \"parallel\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_publish_config_mapping() {
        let config = PacksmithConfig {
            ref_read_attempts: 3,
            ref_read_backoff_ms: 10,
            private_repos: false,
            ..Default::default()
        };
        let publish = config.publish_config();
        assert_eq!(publish.ref_read_attempts, 3);
        assert_eq!(publish.ref_read_backoff, Duration::from_millis(10));
        assert!(!publish.private_repos);
    }
}

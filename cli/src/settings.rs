//! Optional pulsectl settings
//!
//! Read from `~/.config/pulsectl/config.toml` and `PULSECTL_*` variables.
//! Command-line flags win over both.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::Result;

pub const DEFAULT_URL: &str = "http://localhost:8000";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Agent base URL
    pub url: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Default row limit for `processes`
    pub process_limit: Option<usize>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            timeout_secs: 10,
            process_limit: None,
        }
    }
}

/// `~/.config/pulsectl/config.toml`, if a config directory exists
pub fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("pulsectl").join("config.toml"))
}

impl CliConfig {
    /// Load from `path` (or the default location) and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        match path {
            Some(path) => builder = builder.add_source(File::from(path)),
            None => {
                if let Some(path) = default_config_file() {
                    builder = builder.add_source(File::from(path).required(false));
                }
            }
        }

        builder = builder.add_source(Environment::with_prefix("PULSECTL"));
        Ok(builder.build()?.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_overrides_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "url = \"http://pulse.internal:9000\"\nprocess_limit = 5\n").unwrap();

        let config = CliConfig::load(Some(&path)).unwrap();
        assert_eq!(config.url, "http://pulse.internal:9000");
        assert_eq!(config.process_limit, Some(5));
        assert_eq!(config.timeout_secs, 10);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        assert!(CliConfig::load(Some(&temp_dir.path().join("absent.toml"))).is_err());
    }
}

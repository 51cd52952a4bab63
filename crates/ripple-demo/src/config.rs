//! Demo configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (RIPPLE_*)
//! - TOML configuration file (`ripple.toml`, `~/.config/ripple/ripple.toml`)

use anyhow::{Context, Result};
use ripple_nav::HistoryConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Demo configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoConfig {
    /// URL the in-memory platform opens at.
    #[serde(default = "default_start_url")]
    pub start_url: String,

    /// Capabilities of the in-memory platform.
    #[serde(default)]
    pub platform: PlatformConfig,

    /// History options.
    #[serde(default)]
    pub history: HistoryConfig,

    /// Fragments visited in order.
    #[serde(default = "default_script")]
    pub script: Vec<String>,
}

/// Simulated host capabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Native navigation API available.
    #[serde(default = "default_true")]
    pub push_state: bool,

    /// Hash-change notifications delivered.
    #[serde(default = "default_true")]
    pub hash_change: bool,
}

fn default_start_url() -> String {
    std::env::var("RIPPLE_START_URL").unwrap_or_else(|_| "/".to_string())
}

fn default_true() -> bool {
    true
}

fn default_script() -> Vec<String> {
    [
        "notes",
        "notes/new/groceries",
        "notes/new/taxes",
        "notes/new/groceries",
        "notes/1",
        "notes/1/rename/errands",
        "notes/2/delete",
        "settings/profile",
        "notes",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            push_state: true,
            hash_change: true,
        }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            start_url: default_start_url(),
            platform: PlatformConfig::default(),
            history: HistoryConfig::default(),
            script: default_script(),
        }
    }
}

impl DemoConfig {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = ["ripple.toml", "~/.config/ripple/ripple.toml"];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: DemoConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config
            .history
            .validate()
            .with_context(|| format!("Invalid history settings in {}", path.display()))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DemoConfig::default();
        assert!(config.platform.push_state);
        assert!(!config.history.push_state);
        assert!(!config.script.is_empty());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            start_url = "/app/"
            script = ["notes"]

            [platform]
            push_state = false

            [history]
            root = "/app/"
            hash_change = true
        "#;

        let config: DemoConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.start_url, "/app/");
        assert_eq!(config.script, vec!["notes"]);
        assert!(!config.platform.push_state);
        assert!(config.platform.hash_change);
        assert_eq!(config.history.root, "/app/");
        assert_eq!(config.history.interval_ms, 50);
    }
}

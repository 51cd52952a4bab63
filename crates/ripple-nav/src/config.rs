//! History configuration.
//!
//! Loaded from TOML or built in code; every field has a default so an empty
//! document is a valid configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The TOML document could not be parsed.
    #[error("Invalid history configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// The polling period is zero.
    #[error("interval_ms must be at least 1")]
    ZeroInterval,
}

/// Options for [`History::start`](crate::History::start).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Path prefix stripped from every fragment.
    #[serde(default = "default_root")]
    pub root: String,

    /// Prefer the native navigation API when the platform has one.
    #[serde(default)]
    pub push_state: bool,

    /// Allow hash-based navigation and the polling fallback.
    #[serde(default = "default_true")]
    pub hash_change: bool,

    /// Start without loading the current URL.
    #[serde(default)]
    pub silent: bool,

    /// Polling period in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

fn default_root() -> String {
    "/".to_string()
}

fn default_true() -> bool {
    true
}

fn default_interval_ms() -> u64 {
    50 // twenty checks a second
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            push_state: false,
            hash_change: true,
            silent: false,
            interval_ms: default_interval_ms(),
        }
    }
}

impl HistoryConfig {
    /// Parse a configuration from a TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid TOML, a field has the
    /// wrong type, or the values fail [`HistoryConfig::validate`].
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values a document cannot express the type of.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroInterval`] for a zero polling period.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_ms == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        Ok(())
    }

    /// Polling period, never shorter than one millisecond.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    /// Set the root prefix.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    /// Request the native navigation API.
    #[must_use]
    pub fn with_push_state(mut self, enabled: bool) -> Self {
        self.push_state = enabled;
        self
    }

    /// Allow or refuse hash-based navigation.
    #[must_use]
    pub fn with_hash_change(mut self, enabled: bool) -> Self {
        self.hash_change = enabled;
        self
    }

    /// Start silently.
    #[must_use]
    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }
}

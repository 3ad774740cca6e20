//! Runtime configuration for the dispatch and heartbeat layers.
//!
//! The config file is optional — a missing or empty file yields
//! `FeedConfig::default()`. Unknown keys are accepted (serde default
//! behavior), though a warning is logged for likely typos.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Dispatch-layer configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be
/// specified; missing keys fall back to the platform's known-good values.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Sender uins whose feeds are dropped outright (advertisement
    /// accounts).
    pub drop_uins: Vec<u64>,

    /// Feed-id prefixes that mark injected advertisement feeds.
    pub drop_fid_prefixes: Vec<String>,

    /// App ids whose detail endpoint carries everything needed, letting
    /// dispatch skip markup content parsing.
    pub detail_appids: Vec<i32>,

    /// Hard ceiling on listing pages per batch call (runaway guard).
    pub max_pages: u32,

    /// Transient page errors tolerated within one batch call before it
    /// aborts.
    pub page_error_limit: usize,

    pub heartbeat: HeartbeatConfig,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            drop_uins: vec![20_050_606],
            drop_fid_prefixes: vec!["advertisement".to_string()],
            detail_appids: vec![311],
            max_pages: 1000,
            page_error_limit: 5,
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

/// Heartbeat timing and failure tolerance.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Seconds between successful polls.
    pub interval_secs: u64,

    /// Seconds to the next poll after a transient failure.
    pub retry_interval_secs: u64,

    /// Consecutive transient failures before the heartbeat gives up.
    pub max_retries: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            retry_interval_secs: 5,
            max_retries: 5,
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }
}

impl FeedConfig {
    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(FeedConfig::default())`
    /// - Empty file → `Ok(FeedConfig::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line info
    /// - Unknown keys → accepted, logged as a warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            const KNOWN_KEYS: [&str; 6] = [
                "drop_uins",
                "drop_fid_prefixes",
                "detail_appids",
                "max_pages",
                "page_error_limit",
                "heartbeat",
            ];
            for key in raw.keys() {
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "unknown key in config file, ignoring");
                }
            }
        }

        let config: FeedConfig = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FeedConfig::default();
        assert_eq!(config.drop_uins, vec![20_050_606]);
        assert_eq!(config.drop_fid_prefixes, vec!["advertisement"]);
        assert_eq!(config.detail_appids, vec![311]);
        assert_eq!(config.max_pages, 1000);
        assert_eq!(config.page_error_limit, 5);
        assert_eq!(config.heartbeat.interval(), Duration::from_secs(300));
        assert_eq!(config.heartbeat.max_retries, 5);
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/qzfeed_test_nonexistent_config.toml");
        let config = FeedConfig::load(path).unwrap();
        assert_eq!(config.max_pages, 1000);
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let dir = std::env::temp_dir().join("qzfeed_config_test_partial");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(
            &path,
            "drop_uins = [1, 2]\n\n[heartbeat]\nmax_retries = 2\n",
        )
        .unwrap();

        let config = FeedConfig::load(&path).unwrap();
        assert_eq!(config.drop_uins, vec![1, 2]);
        assert_eq!(config.heartbeat.max_retries, 2);
        assert_eq!(config.heartbeat.interval_secs, 300); // default
        assert_eq!(config.detail_appids, vec![311]); // default

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let dir = std::env::temp_dir().join("qzfeed_config_test_invalid");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "this is not [valid toml").unwrap();

        let result = FeedConfig::load(&path);
        assert!(matches!(result, Err(ConfigError::Parse(_))));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_empty_file_returns_default() {
        let dir = std::env::temp_dir().join("qzfeed_config_test_empty");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "  \n").unwrap();

        let config = FeedConfig::load(&path).unwrap();
        assert_eq!(config.page_error_limit, 5);

        std::fs::remove_dir_all(&dir).ok();
    }
}

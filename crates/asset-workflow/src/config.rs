//! Runtime configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AssetError, AssetResult};

/// Asset workflow configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Versioned bundle cache directory (default: `<cache_dir>/asset-workflow/bundles`).
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Scratch directory for decrypted bundle payloads.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Authentication token for the content host.
    #[serde(default)]
    pub token: Option<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries of the connect step.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Cache size limit in bytes; 0 means unlimited.
    #[serde(default)]
    pub max_cache_bytes: u64,

    /// Default progress tick while downloading, in milliseconds.
    #[serde(default = "default_tick_ms")]
    pub tick_interval_ms: u64,
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir().join("asset-workflow")
}

fn default_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_tick_ms() -> u64 {
    16
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            temp_dir: default_temp_dir(),
            token: None,
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            max_cache_bytes: 0,
            tick_interval_ms: default_tick_ms(),
        }
    }
}

impl WorkflowConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `ASSET_WORKFLOW_CACHE_DIR` | Bundle cache directory |
    /// | `ASSET_WORKFLOW_TEMP_DIR` | Scratch directory for decrypted bundles |
    /// | `ASSET_WORKFLOW_TOKEN` | Content host token |
    /// | `ASSET_WORKFLOW_TIMEOUT` | Request timeout in seconds |
    /// | `ASSET_WORKFLOW_MAX_RETRIES` | Connect retries |
    /// | `ASSET_WORKFLOW_MAX_CACHE_BYTES` | Cache size limit |
    /// | `ASSET_WORKFLOW_TICK_MS` | Progress tick in milliseconds |
    pub fn from_env() -> Self {
        Self {
            cache_dir: std::env::var("ASSET_WORKFLOW_CACHE_DIR")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            temp_dir: std::env::var("ASSET_WORKFLOW_TEMP_DIR")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(default_temp_dir),
            token: std::env::var("ASSET_WORKFLOW_TOKEN")
                .ok()
                .filter(|v| !v.is_empty()),
            timeout_secs: env_parse("ASSET_WORKFLOW_TIMEOUT").unwrap_or_else(default_timeout),
            max_retries: env_parse("ASSET_WORKFLOW_MAX_RETRIES")
                .unwrap_or_else(default_max_retries),
            max_cache_bytes: env_parse("ASSET_WORKFLOW_MAX_CACHE_BYTES").unwrap_or(0),
            tick_interval_ms: env_parse("ASSET_WORKFLOW_TICK_MS").unwrap_or_else(default_tick_ms),
        }
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> AssetResult<()> {
        if self.timeout_secs == 0 {
            return Err(AssetError::Config {
                message: "timeout_secs must be > 0".to_string(),
            });
        }
        if self.tick_interval_ms == 0 {
            return Err(AssetError::Config {
                message: "tick_interval_ms must be > 0".to_string(),
            });
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Directory holding decrypted payloads awaiting load.
    pub fn decrypted_dir(&self) -> PathBuf {
        self.temp_dir.join("Decrypted")
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_max_cache_bytes(mut self, bytes: u64) -> Self {
        self.max_cache_bytes = bytes;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval_ms = interval.as_millis().max(1) as u64;
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_config_from_env_defaults() {
        for key in [
            "ASSET_WORKFLOW_CACHE_DIR",
            "ASSET_WORKFLOW_TEMP_DIR",
            "ASSET_WORKFLOW_TOKEN",
            "ASSET_WORKFLOW_TIMEOUT",
            "ASSET_WORKFLOW_MAX_RETRIES",
            "ASSET_WORKFLOW_MAX_CACHE_BYTES",
            "ASSET_WORKFLOW_TICK_MS",
        ] {
            std::env::remove_var(key);
        }

        let config = WorkflowConfig::from_env();
        assert!(config.cache_dir.is_none());
        assert!(config.token.is_none());
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.tick_interval(), Duration::from_millis(16));
    }

    #[test]
    #[serial]
    fn test_config_from_env_overrides() {
        std::env::set_var("ASSET_WORKFLOW_MAX_RETRIES", "5");
        std::env::set_var("ASSET_WORKFLOW_TIMEOUT", "not-a-number");
        std::env::set_var("ASSET_WORKFLOW_TOKEN", "");

        let config = WorkflowConfig::from_env();

        std::env::remove_var("ASSET_WORKFLOW_MAX_RETRIES");
        std::env::remove_var("ASSET_WORKFLOW_TIMEOUT");
        std::env::remove_var("ASSET_WORKFLOW_TOKEN");

        assert_eq!(config.max_retries, 5);
        assert_eq!(config.timeout_secs, 30);
        assert!(config.token.is_none());
    }

    #[test]
    fn test_config_builder() {
        let config = WorkflowConfig::default()
            .with_cache_dir("/tmp/bundles")
            .with_temp_dir("/tmp/scratch")
            .with_token("tok")
            .with_max_cache_bytes(1024);

        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/bundles")));
        assert_eq!(config.decrypted_dir(), PathBuf::from("/tmp/scratch/Decrypted"));
        assert_eq!(config.token.as_deref(), Some("tok"));
        assert_eq!(config.max_cache_bytes, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = WorkflowConfig::default().with_timeout_secs(0);
        assert!(matches!(config.validate(), Err(AssetError::Config { .. })));
    }
}

//! Broker configuration.

use crate::{CoreError, CoreResult, Paths};
use courier_queue::{
    EngineConfig, DEFAULT_DEDUP_CAPACITY, DEFAULT_LATENCY_WINDOW, DEFAULT_LEASE_MS,
    DEFAULT_MAX_DEPTH,
};
use courier_views::TriggerRule;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default lease scan period.
pub const DEFAULT_SCAN_INTERVAL_MS: u64 = 1_000;

/// Environment variable overriding `log_level`.
pub const LOG_LEVEL_ENV: &str = "COURIER_LOG_LEVEL";

/// Broker configuration, read from `config.json`. Missing fields take their
/// defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Ring capacity per stream.
    pub max_depth: usize,
    /// Lease duration in milliseconds.
    pub lease_ms: u64,
    /// Lease scan period in milliseconds.
    pub scan_interval_ms: u64,
    /// Acknowledged ids remembered per stream.
    pub dedup_capacity: usize,
    /// Latency samples kept per stream.
    pub latency_window: usize,
    /// Expiry requeues before an envelope is dropped. Unbounded when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_redeliveries: Option<u32>,
    /// Append every control frame to this file when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_path: Option<PathBuf>,
    pub triggers: Vec<TriggerRule>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            max_depth: DEFAULT_MAX_DEPTH,
            lease_ms: DEFAULT_LEASE_MS,
            scan_interval_ms: DEFAULT_SCAN_INTERVAL_MS,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            latency_window: DEFAULT_LATENCY_WINDOW,
            max_redeliveries: None,
            record_path: None,
            triggers: Vec::new(),
        }
    }
}

impl Config {
    /// Load from the config file if present, then apply environment
    /// overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();
        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };
        config.load_from_env();
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.max_depth == 0 {
            return Err(CoreError::Config("max_depth must be at least 1".to_string()));
        }
        if self.lease_ms == 0 {
            return Err(CoreError::Config("lease_ms must be positive".to_string()));
        }
        if self.scan_interval_ms == 0 {
            return Err(CoreError::Config(
                "scan_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Engine settings derived from this config.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_depth: self.max_depth,
            lease_ms: self.lease_ms,
            dedup_capacity: self.dedup_capacity,
            latency_window: self.latency_window,
            max_redeliveries: self.max_redeliveries,
        }
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    fn load_from_env(&mut self) {
        if let Ok(level) = std::env::var(LOG_LEVEL_ENV) {
            if !level.trim().is_empty() {
                self.log_level = level.trim().to_string();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.max_depth, 100_000);
        assert_eq!(config.lease_ms, 30_000);
        assert_eq!(config.scan_interval(), Duration::from_secs(1));
        assert_eq!(config.dedup_capacity, 10_000);
        assert_eq!(config.latency_window, 64);
        assert!(config.max_redeliveries.is_none());
        assert!(config.triggers.is_empty());
        assert_eq!(config.engine_config(), EngineConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "max_depth": 5,
                "max_redeliveries": 3,
                "triggers": [
                    { "id": "t1", "when": { "to": "a" }, "do": [{ "action": "notify", "to": "b" }] }
                ]
            }"#,
        )
        .unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.max_depth, 5);
        assert_eq!(config.max_redeliveries, Some(3));
        assert_eq!(config.lease_ms, DEFAULT_LEASE_MS);
        assert_eq!(config.triggers[0].id, "t1");
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config {
            lease_ms: 500,
            record_path: Some(dir.path().join("frames.jsonl")),
            ..Config::default()
        };
        config.save(&paths).unwrap();

        let loaded = Config::load_from_file(&paths.config_file()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_nonexistent_uses_defaults() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config::load(&paths).unwrap();
        assert_eq!(config.max_depth, DEFAULT_MAX_DEPTH);
    }

    #[test]
    fn test_validate_rejects_zero_depth() {
        let config = Config {
            max_depth: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }
}

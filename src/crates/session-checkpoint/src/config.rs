//! Checkpoint store configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tooling::config::{
    build_env_key, get_env, load_config_file, override_bool, override_duration, override_parse,
    ConfigBuilder,
};
use tooling::ToolingError;

/// Current layout of persisted checkpoint payloads
pub const SCHEMA_VERSION: u32 = 1;

/// Environment prefix for store settings, e.g. `CHECKPOINT_MAX_CHECKPOINTS`
pub const ENV_PREFIX: &str = "CHECKPOINT_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointStoreConfig {
    /// Per-session cap, oldest evicted first
    pub max_checkpoints: usize,
    /// Store auto checkpoints as diffs against the previous state
    pub enable_diff: bool,
    /// Longest diff chain before an auto checkpoint is stored in full
    pub max_diff_chain: usize,
    pub enable_compression: bool,
    /// Serialized payloads larger than this many bytes are gzipped
    pub compression_threshold: usize,
    /// Age after which non-milestone checkpoints are cleaned up
    pub retention_days: u32,
    #[serde(with = "duration_secs")]
    pub auto_save_interval: Duration,
    #[serde(with = "duration_secs")]
    pub cleanup_interval: Duration,
    /// Skip milestones when enforcing `max_checkpoints`
    pub protect_milestones_from_eviction: bool,
    /// Root directory for the file backend
    pub storage_dir: Option<PathBuf>,
    pub event_capacity: usize,
}

impl Default for CheckpointStoreConfig {
    fn default() -> Self {
        Self {
            max_checkpoints: 50,
            enable_diff: true,
            max_diff_chain: 20,
            enable_compression: true,
            compression_threshold: 10 * 1024,
            retention_days: 7,
            auto_save_interval: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(3600),
            protect_milestones_from_eviction: true,
            storage_dir: None,
            event_capacity: 256,
        }
    }
}

impl CheckpointStoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_checkpoints(mut self, max: usize) -> Self {
        self.max_checkpoints = max;
        self
    }

    pub fn with_diff(mut self, enabled: bool) -> Self {
        self.enable_diff = enabled;
        self
    }

    pub fn with_compression(mut self, enabled: bool, threshold: usize) -> Self {
        self.enable_compression = enabled;
        self.compression_threshold = threshold;
        self
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    pub fn with_auto_save_interval(mut self, interval: Duration) -> Self {
        self.auto_save_interval = interval;
        self
    }

    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = Some(dir.into());
        self
    }

    /// Load from a YAML, JSON or TOML file, then apply `CHECKPOINT_*` overrides
    pub fn from_file(path: impl AsRef<Path>) -> tooling::Result<Self> {
        let config: Self = load_config_file(path)?;
        config.with_env_overrides(ENV_PREFIX)
    }
}

impl ConfigBuilder for CheckpointStoreConfig {
    fn validate(&self) -> tooling::Result<()> {
        if self.max_checkpoints == 0 {
            return Err(ToolingError::Config("max_checkpoints must be at least 1".into()));
        }
        if self.max_diff_chain == 0 {
            return Err(ToolingError::Config("max_diff_chain must be at least 1".into()));
        }
        if self.auto_save_interval.is_zero() || self.cleanup_interval.is_zero() {
            return Err(ToolingError::Config("intervals must be non-zero".into()));
        }
        if self.event_capacity == 0 {
            return Err(ToolingError::Config("event_capacity must be positive".into()));
        }
        Ok(())
    }

    fn apply_env(&mut self, prefix: &str) -> tooling::Result<()> {
        override_parse(&mut self.max_checkpoints, prefix, "max_checkpoints")?;
        override_bool(&mut self.enable_diff, prefix, "enable_diff")?;
        override_parse(&mut self.max_diff_chain, prefix, "max_diff_chain")?;
        override_bool(&mut self.enable_compression, prefix, "enable_compression")?;
        override_parse(&mut self.compression_threshold, prefix, "compression_threshold")?;
        override_parse(&mut self.retention_days, prefix, "retention_days")?;
        override_duration(&mut self.auto_save_interval, prefix, "auto_save_interval")?;
        override_duration(&mut self.cleanup_interval, prefix, "cleanup_interval")?;
        override_bool(
            &mut self.protect_milestones_from_eviction,
            prefix,
            "protect_milestones_from_eviction",
        )?;
        if let Some(dir) = get_env(&build_env_key(prefix, "storage_dir"))? {
            self.storage_dir = Some(PathBuf::from(dir));
        }
        override_parse(&mut self.event_capacity, prefix, "event_capacity")
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_defaults() {
        let config = CheckpointStoreConfig::build().unwrap();
        assert_eq!(config.max_checkpoints, 50);
        assert_eq!(config.retention_days, 7);
        assert_eq!(config.auto_save_interval, Duration::from_secs(30));
        assert!(config.enable_diff);
        assert!(config.protect_milestones_from_eviction);
    }

    #[test]
    fn test_zero_cap_rejected() {
        assert!(CheckpointStoreConfig::default()
            .with_max_checkpoints(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_env_overrides() {
        env::set_var("CKPT_TEST_MAX_CHECKPOINTS", "10");
        env::set_var("CKPT_TEST_AUTO_SAVE_INTERVAL", "5s");
        env::set_var("CKPT_TEST_STORAGE_DIR", "/var/lib/checkpoints");

        let config = CheckpointStoreConfig::from_env("CKPT_TEST_").unwrap();
        assert_eq!(config.max_checkpoints, 10);
        assert_eq!(config.auto_save_interval, Duration::from_secs(5));
        assert_eq!(
            config.storage_dir,
            Some(PathBuf::from("/var/lib/checkpoints"))
        );

        env::remove_var("CKPT_TEST_MAX_CHECKPOINTS");
        env::remove_var("CKPT_TEST_AUTO_SAVE_INTERVAL");
        env::remove_var("CKPT_TEST_STORAGE_DIR");
    }

    #[test]
    fn test_from_toml_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("checkpoints.toml");
        std::fs::write(&path, "max_checkpoints = 20\nauto_save_interval = 60\n").unwrap();

        let config = CheckpointStoreConfig::from_file(&path).unwrap();
        assert_eq!(config.max_checkpoints, 20);
        assert_eq!(config.auto_save_interval, Duration::from_secs(60));
        assert_eq!(config.retention_days, 7);
    }
}

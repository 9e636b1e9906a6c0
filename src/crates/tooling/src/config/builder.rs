//! Configuration builder trait

use crate::Result;

/// Trait for configuration structures with defaults, validation and
/// environment overrides.
///
/// Environment variables follow the pattern `{PREFIX}{FIELD_NAME}` where
/// `FIELD_NAME` is the uppercased field name, e.g. `GUARD_DEFAULT_TIMEOUT`.
/// Only variables that are actually set override the current value.
pub trait ConfigBuilder: Default + Clone {
    /// Validate the configuration
    ///
    /// Returns an error if a value is out of range or two fields contradict
    /// each other.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Overlay values from environment variables onto `self`
    fn apply_env(&mut self, prefix: &str) -> Result<()>;

    /// Start from defaults, apply environment overrides, then validate
    fn from_env(prefix: &str) -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(prefix)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides on top of an existing (e.g. file-loaded)
    /// configuration, then validate
    fn with_env_overrides(mut self, prefix: &str) -> Result<Self> {
        self.apply_env(prefix)?;
        self.validate()?;
        Ok(self)
    }

    /// Create and validate the default configuration
    fn build() -> Result<Self> {
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::override_parse;
    use crate::ToolingError;
    use std::env;

    #[derive(Debug, Clone, PartialEq)]
    struct PoolConfig {
        workers: i32,
    }

    impl Default for PoolConfig {
        fn default() -> Self {
            Self { workers: 4 }
        }
    }

    impl ConfigBuilder for PoolConfig {
        fn validate(&self) -> Result<()> {
            if self.workers <= 0 {
                return Err(ToolingError::Config("workers must be positive".into()));
            }
            Ok(())
        }

        fn apply_env(&mut self, prefix: &str) -> Result<()> {
            override_parse(&mut self.workers, prefix, "workers")
        }
    }

    #[test]
    fn test_build_uses_defaults() {
        let config = PoolConfig::build().unwrap();
        assert_eq!(config, PoolConfig::default());
    }

    #[test]
    fn test_from_env_without_vars_keeps_defaults() {
        let config = PoolConfig::from_env("TOOLING_BUILDER_UNSET_").unwrap();
        assert_eq!(config.workers, 4);
    }

    #[test]
    fn test_from_env_overrides() {
        env::set_var("TOOLING_BUILDER_A_WORKERS", "9");
        let config = PoolConfig::from_env("TOOLING_BUILDER_A_").unwrap();
        assert_eq!(config.workers, 9);
        env::remove_var("TOOLING_BUILDER_A_WORKERS");
    }

    #[test]
    fn test_from_env_validates() {
        env::set_var("TOOLING_BUILDER_B_WORKERS", "0");
        assert!(PoolConfig::from_env("TOOLING_BUILDER_B_").is_err());
        env::remove_var("TOOLING_BUILDER_B_WORKERS");
    }

    #[test]
    fn test_with_env_overrides_keeps_file_values() {
        let loaded = PoolConfig { workers: 12 };
        let config = loaded
            .with_env_overrides("TOOLING_BUILDER_UNSET_")
            .unwrap();
        assert_eq!(config.workers, 12);
    }
}

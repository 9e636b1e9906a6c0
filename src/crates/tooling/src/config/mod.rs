//! Configuration management utilities
//!
//! Every tunable component in the workspace exposes a plain config struct with
//! sensible defaults. This module gives those structs a common shape:
//!
//! - `ConfigBuilder` for defaults, validation and environment overrides
//! - environment variable helpers, including duration parsing (`"250ms"`, `"30s"`)
//! - `load_config_file` for YAML, JSON and TOML files
//!
//! # Example
//!
//! ```rust,ignore
//! use tooling::config::{override_duration, ConfigBuilder};
//!
//! #[derive(Clone, Default)]
//! struct SweepConfig {
//!     pub interval: std::time::Duration,
//! }
//!
//! impl ConfigBuilder for SweepConfig {
//!     fn apply_env(&mut self, prefix: &str) -> tooling::Result<()> {
//!         override_duration(&mut self.interval, prefix, "interval")
//!     }
//! }
//!
//! let config = SweepConfig::from_env("SWEEP_")?;
//! ```

mod builder;
mod env;
mod file;

pub use builder::ConfigBuilder;
pub use env::{
    build_env_key, get_env, get_env_bool, get_env_duration, get_env_parse, override_bool,
    override_duration, override_parse, parse_duration,
};
pub use file::load_config_file;

//! Shared tooling for the recovery engine crates
//!
//! This crate holds the ambient pieces that both the execution guard and the
//! checkpoint store lean on:
//!
//! - `config` - `ConfigBuilder` trait, environment overrides and config file loading
//! - `clock` - wall-clock abstraction so timestamps can be driven from tests
//! - `logging` - tracing subscriber setup and human-readable formatters

pub mod clock;
pub mod config;
pub mod logging;

use thiserror::Error;

/// Errors that can occur in the tooling crate
#[derive(Debug, Error)]
pub enum ToolingError {
    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tracing subscriber could not be installed
    #[error("Logging error: {0}")]
    Logging(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for tooling operations
pub type Result<T> = std::result::Result<T, ToolingError>;

/// Get version information
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }

    #[test]
    fn test_error_display() {
        let err = ToolingError::Config("retry delay must be positive".into());
        assert_eq!(
            err.to_string(),
            "Configuration error: retry delay must be positive"
        );
    }
}

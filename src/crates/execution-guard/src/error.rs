//! Error types for guarded execution

use thiserror::Error;

/// Failures a guarded call can end with
///
/// These are reported inside [`ExecutionResult`](crate::ExecutionResult)
/// rather than propagated, so the type is `Clone` and carries messages
/// instead of source errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    /// An attempt did not settle within its timeout
    #[error("Operation '{operation}' timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// The operation itself failed
    #[error("Operation '{operation}' failed: {message}")]
    Operation { operation: String, message: String },

    /// The circuit for this operation is open, primary path skipped
    #[error("Circuit open for '{operation}', primary execution rejected")]
    CircuitOpen { operation: String },

    /// Every fallback candidate failed or timed out
    #[error("All {attempted} fallback(s) failed for '{operation}'; primary error: {primary}")]
    FallbackExhausted {
        operation: String,
        attempted: usize,
        primary: String,
    },

    /// The execution was cancelled by the caller
    #[error("Execution of '{operation}' was cancelled")]
    Cancelled { operation: String },

    /// Rejected configuration
    #[error("Invalid guard configuration: {0}")]
    InvalidConfig(String),
}

impl GuardError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, GuardError::Timeout { .. })
    }
}

impl From<tooling::ToolingError> for GuardError {
    fn from(err: tooling::ToolingError) -> Self {
        GuardError::InvalidConfig(err.to_string())
    }
}

/// Result type for guard setup operations
pub type Result<T> = std::result::Result<T, GuardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_mentions_timed_out() {
        let err = GuardError::Timeout {
            operation: "summarize".into(),
            timeout_ms: 1000,
        };
        assert!(err.to_string().contains("timed out"));
        assert!(err.is_timeout());
    }

    #[test]
    fn test_exhausted_keeps_primary_cause() {
        let primary = GuardError::Timeout {
            operation: "summarize".into(),
            timeout_ms: 250,
        };
        let err = GuardError::FallbackExhausted {
            operation: "summarize".into(),
            attempted: 2,
            primary: primary.to_string(),
        };
        assert!(err.to_string().contains("timed out"));
        assert!(!err.is_timeout());
    }
}

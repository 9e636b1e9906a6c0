//! Error types for checkpoint operations

use thiserror::Error;

/// Result type for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors that can occur during checkpoint operations
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// No checkpoint with this id in memory or storage
    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    /// Payload failed shape, hash or decode checks
    #[error("Checkpoint {id} failed integrity check: {reason}")]
    Integrity { id: String, reason: String },

    /// A diff checkpoint's ancestor could not be loaded
    #[error("Checkpoint {checkpoint_id} depends on missing parent {parent_id}")]
    ParentMissing {
        checkpoint_id: String,
        parent_id: String,
    },

    /// The session has no checkpoints at all
    #[error("No checkpoints for session {0}")]
    NoCheckpoints(String),

    /// The session has no checkpoint at or before the requested time
    #[error("No checkpoint for session {session_id} at or before {target}")]
    NoCheckpointBefore { session_id: String, target: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Compression or decompression failed
    #[error("Compression error: {0}")]
    Compression(String),

    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Rejected configuration
    #[error("Invalid checkpoint configuration: {0}")]
    InvalidConfig(String),
}

impl CheckpointError {
    pub(crate) fn integrity(id: impl Into<String>, reason: impl Into<String>) -> Self {
        CheckpointError::Integrity {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

impl From<tooling::ToolingError> for CheckpointError {
    fn from(err: tooling::ToolingError) -> Self {
        CheckpointError::InvalidConfig(err.to_string())
    }
}

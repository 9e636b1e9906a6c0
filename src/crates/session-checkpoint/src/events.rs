//! Checkpoint lifecycle events
//!
//! Broadcast to subscribers of [`CheckpointStore::subscribe`](crate::CheckpointStore::subscribe).
//! Nobody listening is not an error.

use crate::checkpoint::{CheckpointId, CheckpointType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckpointEvent {
    CheckpointCreated {
        session_id: String,
        checkpoint_id: CheckpointId,
        kind: CheckpointType,
        is_diff: bool,
        size_bytes: usize,
        compressed: bool,
        timestamp: DateTime<Utc>,
    },
    CheckpointRestored {
        session_id: String,
        checkpoint_id: CheckpointId,
        /// Number of checkpoints replayed, including the full base
        chain_length: usize,
        timestamp: DateTime<Utc>,
    },
    /// Removed by the per-session count cap
    CheckpointEvicted {
        session_id: String,
        checkpoint_id: CheckpointId,
        timestamp: DateTime<Utc>,
    },
    AutoSaveStarted {
        session_id: String,
        interval_ms: u64,
        timestamp: DateTime<Utc>,
    },
    AutoSaveStopped {
        session_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A tick failed; the schedule keeps running
    AutoSaveError {
        session_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    CleanupComplete {
        removed: usize,
        sessions: usize,
        timestamp: DateTime<Utc>,
    },
}

impl CheckpointEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            CheckpointEvent::CheckpointCreated { timestamp, .. }
            | CheckpointEvent::CheckpointRestored { timestamp, .. }
            | CheckpointEvent::CheckpointEvicted { timestamp, .. }
            | CheckpointEvent::AutoSaveStarted { timestamp, .. }
            | CheckpointEvent::AutoSaveStopped { timestamp, .. }
            | CheckpointEvent::AutoSaveError { timestamp, .. }
            | CheckpointEvent::CleanupComplete { timestamp, .. } => *timestamp,
        }
    }

    /// `None` for store-wide events
    pub fn session_id(&self) -> Option<&str> {
        match self {
            CheckpointEvent::CheckpointCreated { session_id, .. }
            | CheckpointEvent::CheckpointRestored { session_id, .. }
            | CheckpointEvent::CheckpointEvicted { session_id, .. }
            | CheckpointEvent::AutoSaveStarted { session_id, .. }
            | CheckpointEvent::AutoSaveStopped { session_id, .. }
            | CheckpointEvent::AutoSaveError { session_id, .. } => Some(session_id),
            CheckpointEvent::CleanupComplete { .. } => None,
        }
    }

    /// Kebab-case event name, e.g. `auto-save-error`
    pub fn name(&self) -> &'static str {
        match self {
            CheckpointEvent::CheckpointCreated { .. } => "checkpoint-created",
            CheckpointEvent::CheckpointRestored { .. } => "checkpoint-restored",
            CheckpointEvent::CheckpointEvicted { .. } => "checkpoint-evicted",
            CheckpointEvent::AutoSaveStarted { .. } => "auto-save-started",
            CheckpointEvent::AutoSaveStopped { .. } => "auto-save-stopped",
            CheckpointEvent::AutoSaveError { .. } => "auto-save-error",
            CheckpointEvent::CleanupComplete { .. } => "cleanup-complete",
        }
    }

    pub fn description(&self) -> String {
        match self {
            CheckpointEvent::CheckpointCreated {
                session_id,
                checkpoint_id,
                kind,
                is_diff,
                ..
            } => format!(
                "Checkpoint created: {} ({}, {}) for {}",
                checkpoint_id,
                kind,
                if *is_diff { "diff" } else { "full" },
                session_id
            ),
            CheckpointEvent::CheckpointRestored {
                checkpoint_id,
                chain_length,
                ..
            } => format!(
                "Checkpoint restored: {} (chain of {})",
                checkpoint_id, chain_length
            ),
            CheckpointEvent::CheckpointEvicted { checkpoint_id, .. } => {
                format!("Checkpoint evicted: {}", checkpoint_id)
            }
            CheckpointEvent::AutoSaveStarted {
                session_id,
                interval_ms,
                ..
            } => format!("Auto-save started for {} every {}ms", session_id, interval_ms),
            CheckpointEvent::AutoSaveStopped { session_id, .. } => {
                format!("Auto-save stopped for {}", session_id)
            }
            CheckpointEvent::AutoSaveError {
                session_id, error, ..
            } => format!("Auto-save failed for {}: {}", session_id, error),
            CheckpointEvent::CleanupComplete {
                removed, sessions, ..
            } => format!(
                "Cleanup removed {} checkpoints across {} sessions",
                removed, sessions
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_serialization() {
        let event = CheckpointEvent::AutoSaveError {
            session_id: "s1".into(),
            error: "provider failed".into(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "auto_save_error");
        assert_eq!(event.name(), "auto-save-error");
        assert_eq!(event.session_id(), Some("s1"));

        let back: CheckpointEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_cleanup_is_store_wide() {
        let event = CheckpointEvent::CleanupComplete {
            removed: 3,
            sessions: 2,
            timestamp: Utc::now(),
        };
        assert_eq!(event.session_id(), None);
        assert!(event.description().contains("3 checkpoints"));
    }
}

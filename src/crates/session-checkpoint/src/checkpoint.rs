//! Checkpoint data structures
//!
//! A [`Checkpoint`] is an immutable snapshot of one session's working state,
//! held either in full or as a diff against its parent. Only the label (and,
//! through [`mark_milestone`](crate::CheckpointStore::mark_milestone), the
//! type tag) can change after creation.
//!
//! [`CheckpointRecord`] is the envelope written to storage: the same fields
//! with the payload in its stored (possibly compressed) encoding.

use crate::codec::{CheckpointPayload, StoredPayload};
use crate::config::SCHEMA_VERSION;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Unique identifier for checkpoints
pub type CheckpointId = String;

/// How a checkpoint came to exist
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointType {
    /// Taken by the auto-save scheduler
    Auto,
    /// Requested explicitly by the host
    Manual,
    /// Protected from age-based retention
    Milestone,
}

impl fmt::Display for CheckpointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CheckpointType::Auto => "auto",
            CheckpointType::Manual => "manual",
            CheckpointType::Milestone => "milestone",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub schema_version: u32,

    /// Why the checkpoint was taken, e.g. "auto-save" or "before deploy"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_reason: Option<String>,

    /// The checkpoint this diff applies to; `None` for full snapshots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_checkpoint_id: Option<CheckpointId>,

    /// Additional custom metadata
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for CheckpointMetadata {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            trigger_reason: None,
            parent_checkpoint_id: None,
            extra: Map::new(),
        }
    }
}

impl CheckpointMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trigger_reason(mut self, reason: impl Into<String>) -> Self {
        self.trigger_reason = Some(reason.into());
        self
    }

    pub fn with_parent(mut self, parent: impl Into<CheckpointId>) -> Self {
        self.parent_checkpoint_id = Some(parent.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// State snapshot of one session at a point in time
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub id: CheckpointId,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    /// Creation order within the store, breaks timestamp ties
    pub sequence: u64,
    pub kind: CheckpointType,
    pub label: Option<String>,
    pub payload: CheckpointPayload,
    pub metadata: CheckpointMetadata,
    /// SHA-256 of the canonical serialized payload
    pub hash: String,
    /// Size of the serialized payload before compression
    pub size_bytes: usize,
    pub compressed: bool,
}

impl Checkpoint {
    pub fn is_diff(&self) -> bool {
        self.payload.is_diff()
    }

    pub fn is_milestone(&self) -> bool {
        self.kind == CheckpointType::Milestone
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.metadata.parent_checkpoint_id.as_deref()
    }

    pub fn summary(&self) -> CheckpointSummary {
        CheckpointSummary {
            id: self.id.clone(),
            session_id: self.session_id.clone(),
            timestamp: self.timestamp,
            kind: self.kind,
            label: self.label.clone(),
            is_diff: self.is_diff(),
            parent_checkpoint_id: self.metadata.parent_checkpoint_id.clone(),
            size_bytes: self.size_bytes,
            compressed: self.compressed,
        }
    }

    pub(crate) fn to_record(&self, stored: StoredPayload) -> CheckpointRecord {
        CheckpointRecord {
            format_version: CheckpointRecord::FORMAT_VERSION,
            id: self.id.clone(),
            session_id: self.session_id.clone(),
            timestamp: self.timestamp,
            sequence: self.sequence,
            kind: self.kind,
            label: self.label.clone(),
            metadata: self.metadata.clone(),
            hash: self.hash.clone(),
            size_bytes: self.size_bytes,
            compressed: self.compressed,
            payload: stored,
        }
    }
}

/// Persisted form of a [`Checkpoint`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub format_version: u32,
    pub id: CheckpointId,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub sequence: u64,
    #[serde(rename = "type")]
    pub kind: CheckpointType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub metadata: CheckpointMetadata,
    pub hash: String,
    pub size_bytes: usize,
    pub compressed: bool,
    pub payload: StoredPayload,
}

impl CheckpointRecord {
    pub const FORMAT_VERSION: u32 = 1;

    pub(crate) fn into_checkpoint(self, payload: CheckpointPayload) -> Checkpoint {
        Checkpoint {
            id: self.id,
            session_id: self.session_id,
            timestamp: self.timestamp,
            sequence: self.sequence,
            kind: self.kind,
            label: self.label,
            payload,
            metadata: self.metadata,
            hash: self.hash,
            size_bytes: self.size_bytes,
            compressed: self.compressed,
        }
    }
}

/// Listing view of a checkpoint, without its payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub id: CheckpointId,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: CheckpointType,
    pub label: Option<String>,
    pub is_diff: bool,
    pub parent_checkpoint_id: Option<CheckpointId>,
    pub size_bytes: usize,
    pub compressed: bool,
}

//! # session-checkpoint - Recoverable Session State
//!
//! **Diff-based checkpoints of a session's working state** with restore,
//! point-in-time recovery, periodic auto-save and age-based retention.
//!
//! ## Overview
//!
//! A session's state (conversation, tasks, agents, memory, custom data) is
//! captured as a [`Checkpoint`]. Checkpoints are:
//!
//! - **Incremental** - auto checkpoints store only what changed since the
//!   previous one; restore replays the chain back to its full base
//! - **Verified** - every payload carries a SHA-256 hash checked on restore
//! - **Compressed** - payloads above a size threshold are gzipped
//! - **Durable** - records are written to a [`CheckpointStorage`] backend
//!   before creation returns
//! - **Bounded** - a per-session count cap and an age limit keep history
//!   small; milestones survive the age limit
//!
//! ## Core Types
//!
//! - [`CheckpointStore`] - create, query, restore and prune checkpoints
//! - [`DiffEngine`] - compute and replay [`StateDiff`]s
//! - [`AutoSaveScheduler`] - periodic auto checkpoints from a [`StateProvider`]
//! - [`RetentionManager`] - periodic age-based cleanup
//! - [`InMemoryStorage`] / [`FileStorage`] - storage backends
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use session_checkpoint::{
//!     CheckpointState, CheckpointStore, CheckpointStoreConfig, CheckpointType, Message,
//!     RestoreOptions,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = CheckpointStore::open(
//!         CheckpointStoreConfig::default().with_storage_dir("./checkpoints"),
//!     )?;
//!
//!     let state = CheckpointState::new().with_message(Message::user("Summarize the report"));
//!     let checkpoint = store
//!         .create_checkpoint("session-1", state, CheckpointType::Manual, Some("start"), None)
//!         .await?;
//!
//!     let restored = store
//!         .restore_checkpoint(&checkpoint.id, RestoreOptions::default())
//!         .await?;
//!     assert_eq!(restored.message_count(), 1);
//!     Ok(())
//! }
//! ```
//!
//! ## Auto-Save
//!
//! ```rust,no_run
//! use session_checkpoint::{AutoSaveScheduler, CheckpointState, CheckpointStore};
//! use std::sync::Arc;
//!
//! # async fn example(store: Arc<CheckpointStore>) {
//! let scheduler = AutoSaveScheduler::new(Arc::clone(&store));
//! scheduler.start_auto_save("session-1", || async {
//!     Ok::<_, anyhow::Error>(CheckpointState::new())
//! });
//!
//! // on exit: stop every schedule and take one final checkpoint per session
//! scheduler.shutdown().await;
//! # }
//! ```
//!
//! ## Diff Chains
//!
//! ```text
//! A (full) <- B (diff) <- C (diff)
//!
//! restore(C) = apply(apply(A, B), C)
//! ```
//!
//! Chains are capped at `max_diff_chain`; the next auto checkpoint after the
//! cap is stored in full. When eviction, retention or deletion removes a
//! checkpoint that a surviving diff depends on, that diff is first rewritten
//! as a full checkpoint.

pub mod autosave;
pub mod checkpoint;
pub mod codec;
pub mod config;
pub mod diff;
pub mod error;
pub mod events;
pub mod retention;
pub mod state;
pub mod storage;
pub mod store;

pub use autosave::{AutoSaveScheduler, StateProvider};
pub use checkpoint::{
    Checkpoint, CheckpointId, CheckpointMetadata, CheckpointRecord, CheckpointSummary,
    CheckpointType,
};
pub use codec::{content_hash, CheckpointPayload, PayloadCodec, StoredPayload};
pub use config::{CheckpointStoreConfig, SCHEMA_VERSION};
pub use diff::{ConversationDiff, CustomDelta, DiffEngine, DiffError, MessageDelta, StateDiff};
pub use error::{CheckpointError, Result};
pub use events::CheckpointEvent;
pub use retention::{RetentionManager, RetentionPolicy};
pub use state::{
    AgentSnapshot, CheckpointState, ConversationRecord, MemorySnapshot, Message, TaskSnapshot,
};
pub use storage::{CheckpointStorage, FileStorage, InMemoryStorage};
pub use store::{CheckpointStore, CleanupReport, RestoreOptions, StoreStats};

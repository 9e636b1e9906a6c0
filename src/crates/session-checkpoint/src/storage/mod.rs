//! Durable storage backends for checkpoint records
//!
//! Backends move opaque bytes; encoding, hashing and chain reconstruction
//! live in the store. Records are addressed by checkpoint id, so writes for
//! different checkpoints never collide.
//!
//! - [`InMemoryStorage`] keeps everything in process memory (tests, ephemeral
//!   sessions)
//! - [`FileStorage`] writes one JSON file per checkpoint under a root directory

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::InMemoryStorage;

use crate::error::Result;
use async_trait::async_trait;
use std::fmt::Debug;

/// Backend a [`CheckpointStore`](crate::CheckpointStore) persists into
#[async_trait]
pub trait CheckpointStorage: Send + Sync + Debug {
    /// Write (or overwrite) the record for `id`
    async fn write(&self, session_id: &str, id: &str, bytes: Vec<u8>) -> Result<()>;

    /// Read a record. Without a session hint the backend searches every session.
    async fn read(&self, id: &str, session_hint: Option<&str>) -> Result<Option<Vec<u8>>>;

    /// Ids of all records stored for a session, in no particular order
    async fn list_session(&self, session_id: &str) -> Result<Vec<String>>;

    async fn list_sessions(&self) -> Result<Vec<String>>;

    /// Returns `false` if there was nothing to delete
    async fn delete(&self, id: &str, session_hint: Option<&str>) -> Result<bool>;
}

//! In-process checkpoint storage

use super::CheckpointStorage;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Session id -> checkpoint id -> record bytes
type SessionRecords = HashMap<String, HashMap<String, Vec<u8>>>;

/// Storage that lives as long as the process
///
/// Clones share the same records, so a test can keep a handle and inspect
/// what the store wrote.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    records: Arc<RwLock<SessionRecords>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of records across all sessions
    pub async fn record_count(&self) -> usize {
        self.records.read().await.values().map(HashMap::len).sum()
    }

    /// Clear all records (useful for testing)
    pub async fn clear(&self) {
        self.records.write().await.clear();
    }
}

#[async_trait]
impl CheckpointStorage for InMemoryStorage {
    async fn write(&self, session_id: &str, id: &str, bytes: Vec<u8>) -> Result<()> {
        self.records
            .write()
            .await
            .entry(session_id.to_string())
            .or_default()
            .insert(id.to_string(), bytes);
        Ok(())
    }

    async fn read(&self, id: &str, session_hint: Option<&str>) -> Result<Option<Vec<u8>>> {
        let records = self.records.read().await;
        if let Some(session) = session_hint {
            if let Some(bytes) = records.get(session).and_then(|s| s.get(id)) {
                return Ok(Some(bytes.clone()));
            }
        }
        Ok(records.values().find_map(|s| s.get(id)).cloned())
    }

    async fn list_session(&self, session_id: &str) -> Result<Vec<String>> {
        Ok(self
            .records
            .read()
            .await
            .get(session_id)
            .map(|s| s.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_sessions(&self) -> Result<Vec<String>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|(_, s)| !s.is_empty())
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn delete(&self, id: &str, session_hint: Option<&str>) -> Result<bool> {
        let mut records = self.records.write().await;
        if let Some(session) = session_hint {
            if records
                .get_mut(session)
                .and_then(|s| s.remove(id))
                .is_some()
            {
                return Ok(true);
            }
        }
        Ok(records.values_mut().any(|s| s.remove(id).is_some()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_read_delete() {
        let storage = InMemoryStorage::new();
        storage.write("s1", "cp-1", b"one".to_vec()).await.unwrap();
        storage.write("s2", "cp-2", b"two".to_vec()).await.unwrap();

        assert_eq!(
            storage.read("cp-1", Some("s1")).await.unwrap(),
            Some(b"one".to_vec())
        );
        // wrong hint falls back to a search
        assert_eq!(
            storage.read("cp-2", Some("s1")).await.unwrap(),
            Some(b"two".to_vec())
        );
        assert_eq!(storage.record_count().await, 2);

        assert!(storage.delete("cp-1", None).await.unwrap());
        assert!(!storage.delete("cp-1", None).await.unwrap());
        assert_eq!(storage.list_sessions().await.unwrap(), vec!["s2".to_string()]);
    }
}

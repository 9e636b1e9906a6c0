//! Checkpoint store
//!
//! Owns the per-session checkpoint lists, decides between full and diff
//! payloads, persists records through a [`CheckpointStorage`] backend and
//! rebuilds full states by replaying diff chains.
//!
//! Locks guard plain maps and are never held across an await. Two writers for
//! the same session (an auto-save tick and a manual checkpoint) may interleave;
//! "latest" always means chronologically last at the time of the query.

use crate::checkpoint::{
    Checkpoint, CheckpointId, CheckpointMetadata, CheckpointRecord, CheckpointSummary,
    CheckpointType,
};
use crate::codec::{CheckpointPayload, PayloadCodec};
use crate::config::CheckpointStoreConfig;
use crate::diff::DiffEngine;
use crate::error::{CheckpointError, Result};
use crate::events::CheckpointEvent;
use crate::retention::RetentionPolicy;
use crate::state::CheckpointState;
use crate::storage::{CheckpointStorage, FileStorage, InMemoryStorage};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tooling::clock::{Clock, SystemClock};
use tooling::config::ConfigBuilder;
use tooling::logging::format_bytes;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Options for [`CheckpointStore::restore_checkpoint`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreOptions {
    /// Skip hash and shape checks
    pub skip_validation: bool,
    /// Drop the sections whose `include_*` flag is off
    pub partial: bool,
    pub include_tasks: bool,
    pub include_agents: bool,
    pub include_memory: bool,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            skip_validation: false,
            partial: false,
            include_tasks: true,
            include_agents: true,
            include_memory: true,
        }
    }
}

impl RestoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip_validation(mut self) -> Self {
        self.skip_validation = true;
        self
    }

    /// Restore only the requested sections; the conversation is always kept
    pub fn partial(mut self, tasks: bool, agents: bool, memory: bool) -> Self {
        self.partial = true;
        self.include_tasks = tasks;
        self.include_agents = agents;
        self.include_memory = memory;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub removed: usize,
    /// Sessions that lost at least one checkpoint
    pub sessions: usize,
    pub removed_ids: Vec<CheckpointId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub sessions: usize,
    pub checkpoints: usize,
    pub full_checkpoints: usize,
    pub diff_checkpoints: usize,
    pub milestones: usize,
    pub total_bytes: usize,
    pub compressed: usize,
}

pub struct CheckpointStore {
    config: CheckpointStoreConfig,
    storage: Arc<dyn CheckpointStorage>,
    clock: Arc<dyn Clock>,
    codec: PayloadCodec,
    /// Resident checkpoints per session, oldest first
    sessions: Mutex<HashMap<String, Vec<Checkpoint>>>,
    /// Last state created or restored per session
    current: Mutex<HashMap<String, CheckpointState>>,
    sequence: AtomicU64,
    events: broadcast::Sender<CheckpointEvent>,
}

impl std::fmt::Debug for CheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointStore")
            .field("config", &self.config)
            .field("storage", &self.storage)
            .field("sessions", &self.sessions.lock().len())
            .finish()
    }
}

impl CheckpointStore {
    pub fn new(config: CheckpointStoreConfig, storage: Arc<dyn CheckpointStorage>) -> Result<Self> {
        Self::with_clock(config, storage, Arc::new(SystemClock))
    }

    /// Store reading wall-clock time from `clock`
    pub fn with_clock(
        config: CheckpointStoreConfig,
        storage: Arc<dyn CheckpointStorage>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(config.event_capacity);
        Ok(Self {
            codec: PayloadCodec::new(config.enable_compression, config.compression_threshold),
            config,
            storage,
            clock,
            sessions: Mutex::new(HashMap::new()),
            current: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
            events,
        })
    }

    pub fn in_memory(config: CheckpointStoreConfig) -> Result<Self> {
        Self::new(config, Arc::new(InMemoryStorage::new()))
    }

    /// File storage under `config.storage_dir`, or memory when unset
    pub fn open(config: CheckpointStoreConfig) -> Result<Self> {
        let storage: Arc<dyn CheckpointStorage> = match &config.storage_dir {
            Some(dir) => Arc::new(FileStorage::new(dir.clone())),
            None => Arc::new(InMemoryStorage::new()),
        };
        Self::new(config, storage)
    }

    pub fn config(&self) -> &CheckpointStoreConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn CheckpointStorage> {
        &self.storage
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CheckpointEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: CheckpointEvent) {
        let _ = self.events.send(event);
    }

    /// Create and persist a checkpoint of `state`
    ///
    /// Auto checkpoints are stored as a diff against the reconstructed state
    /// of the session's latest checkpoint when diffing is enabled, the diff is
    /// non-empty and the parent chain is shorter than `max_diff_chain`. All
    /// other checkpoints hold the full state.
    pub async fn create_checkpoint(
        &self,
        session_id: &str,
        state: CheckpointState,
        kind: CheckpointType,
        label: Option<&str>,
        trigger_reason: Option<&str>,
    ) -> Result<Checkpoint> {
        let mut metadata = CheckpointMetadata::new();
        metadata.trigger_reason = trigger_reason.map(str::to_string);

        let payload = match self.diff_base(session_id, kind).await {
            Some((parent, previous)) => match DiffEngine::diff(&previous, &state) {
                Some(diff) => {
                    metadata.parent_checkpoint_id = Some(parent);
                    CheckpointPayload::Diff(diff)
                }
                None => CheckpointPayload::Full(state.clone()),
            },
            None => CheckpointPayload::Full(state.clone()),
        };

        let encoded = self.codec.encode(&payload)?;
        let checkpoint = Checkpoint {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            timestamp: self.clock.now(),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            kind,
            label: label.map(str::to_string),
            payload,
            metadata,
            hash: encoded.hash,
            size_bytes: encoded.size_bytes,
            compressed: encoded.compressed,
        };

        let record = checkpoint.to_record(encoded.stored);
        self.storage
            .write(session_id, &checkpoint.id, serde_json::to_vec(&record)?)
            .await?;

        let overflow = {
            let mut sessions = self.sessions.lock();
            let list = sessions.entry(session_id.to_string()).or_default();
            list.push(checkpoint.clone());
            self.eviction_candidates(list)
        };
        self.current
            .lock()
            .insert(session_id.to_string(), state);

        info!(
            session_id = %session_id,
            checkpoint_id = %checkpoint.id,
            kind = %kind,
            diff = checkpoint.is_diff(),
            size = %format_bytes(checkpoint.size_bytes),
            compressed = checkpoint.compressed,
            "Checkpoint created"
        );
        self.emit(CheckpointEvent::CheckpointCreated {
            session_id: session_id.to_string(),
            checkpoint_id: checkpoint.id.clone(),
            kind,
            is_diff: checkpoint.is_diff(),
            size_bytes: checkpoint.size_bytes,
            compressed: checkpoint.compressed,
            timestamp: checkpoint.timestamp,
        });

        if !overflow.is_empty() {
            let removed = self.remove_checkpoints(session_id, &overflow).await?;
            for evicted in removed {
                debug!(session_id = %session_id, checkpoint_id = %evicted.id, "Checkpoint evicted");
                self.emit(CheckpointEvent::CheckpointEvicted {
                    session_id: session_id.to_string(),
                    checkpoint_id: evicted.id,
                    timestamp: self.clock.now(),
                });
            }
        }

        Ok(checkpoint)
    }

    /// Parent id and reconstructed state for a new diff, if one should be taken
    async fn diff_base(
        &self,
        session_id: &str,
        kind: CheckpointType,
    ) -> Option<(CheckpointId, CheckpointState)> {
        if !self.config.enable_diff || kind != CheckpointType::Auto {
            return None;
        }
        let latest = self.latest_resident(session_id)?;

        match self.reconstruct(&latest, false).await {
            Ok((_, chain_len)) if chain_len >= self.config.max_diff_chain => {
                debug!(
                    session_id = %session_id,
                    chain_len,
                    "Diff chain at limit, storing full state"
                );
                None
            }
            Ok((state, _)) => Some((latest.id, state)),
            Err(e) => {
                warn!(
                    session_id = %session_id,
                    parent = %latest.id,
                    error = %e,
                    "Cannot rebuild previous state, storing full state"
                );
                None
            }
        }
    }

    /// Ids to drop so the list fits `max_checkpoints`, oldest first
    ///
    /// The newest checkpoint is never a candidate. When only protected
    /// milestones precede it the list stays over the cap.
    fn eviction_candidates(&self, list: &[Checkpoint]) -> HashSet<CheckpointId> {
        let excess = list.len().saturating_sub(self.config.max_checkpoints);
        let older = &list[..list.len().saturating_sub(1)];
        older
            .iter()
            .filter(|cp| !(self.config.protect_milestones_from_eviction && cp.is_milestone()))
            .take(excess)
            .map(|cp| cp.id.clone())
            .collect()
    }

    /// Rebuild the full state a checkpoint represents
    pub async fn restore_checkpoint(
        &self,
        checkpoint_id: &str,
        options: RestoreOptions,
    ) -> Result<CheckpointState> {
        let validate = !options.skip_validation;
        let checkpoint = self
            .locate(checkpoint_id, None, validate)
            .await?
            .ok_or_else(|| CheckpointError::NotFound(checkpoint_id.to_string()))?;

        let (mut state, chain_length) = self.reconstruct(&checkpoint, validate).await?;

        if options.partial {
            if !options.include_tasks {
                state.tasks.clear();
            }
            if !options.include_agents {
                state.agents.clear();
            }
            if !options.include_memory {
                state.memory = Default::default();
            }
        }

        self.current
            .lock()
            .insert(checkpoint.session_id.clone(), state.clone());

        info!(
            session_id = %checkpoint.session_id,
            checkpoint_id = %checkpoint.id,
            chain_length,
            "Checkpoint restored"
        );
        self.emit(CheckpointEvent::CheckpointRestored {
            session_id: checkpoint.session_id,
            checkpoint_id: checkpoint.id,
            chain_length,
            timestamp: self.clock.now(),
        });

        Ok(state)
    }

    /// Restore the latest checkpoint taken at or before `target`
    pub async fn restore_to_time(
        &self,
        session_id: &str,
        target: DateTime<Utc>,
    ) -> Result<CheckpointState> {
        self.ensure_resident(session_id).await?;

        let id = {
            let sessions = self.sessions.lock();
            let list = sessions
                .get(session_id)
                .filter(|list| !list.is_empty())
                .ok_or_else(|| CheckpointError::NoCheckpoints(session_id.to_string()))?;
            list.iter()
                .filter(|cp| cp.timestamp <= target)
                .max_by_key(|cp| (cp.timestamp, cp.sequence))
                .map(|cp| cp.id.clone())
                .ok_or_else(|| CheckpointError::NoCheckpointBefore {
                    session_id: session_id.to_string(),
                    target: target.to_rfc3339(),
                })?
        };

        self.restore_checkpoint(&id, RestoreOptions::default()).await
    }

    pub async fn restore_latest(&self, session_id: &str) -> Result<CheckpointState> {
        self.ensure_resident(session_id).await?;
        let latest = self
            .latest_resident(session_id)
            .ok_or_else(|| CheckpointError::NoCheckpoints(session_id.to_string()))?;
        self.restore_checkpoint(&latest.id, RestoreOptions::default())
            .await
    }

    /// Tag a checkpoint as a milestone, optionally relabeling it
    pub async fn mark_milestone(
        &self,
        checkpoint_id: &str,
        label: Option<&str>,
    ) -> Result<CheckpointSummary> {
        self.update_checkpoint(checkpoint_id, |cp| {
            cp.kind = CheckpointType::Milestone;
            if let Some(label) = label {
                cp.label = Some(label.to_string());
            }
        })
        .await
    }

    pub async fn label_checkpoint(&self, checkpoint_id: &str, label: &str) -> Result<CheckpointSummary> {
        self.update_checkpoint(checkpoint_id, |cp| cp.label = Some(label.to_string()))
            .await
    }

    /// Apply a tag change in memory (when resident) and in storage
    async fn update_checkpoint(
        &self,
        checkpoint_id: &str,
        change: impl Fn(&mut Checkpoint),
    ) -> Result<CheckpointSummary> {
        let resident = {
            let mut sessions = self.sessions.lock();
            sessions
                .values_mut()
                .flat_map(|list| list.iter_mut())
                .find(|cp| cp.id == checkpoint_id)
                .map(|cp| {
                    change(cp);
                    cp.clone()
                })
        };

        let checkpoint = match resident {
            Some(cp) => cp,
            None => {
                let mut cp = self
                    .locate(checkpoint_id, None, false)
                    .await?
                    .ok_or_else(|| CheckpointError::NotFound(checkpoint_id.to_string()))?;
                change(&mut cp);
                cp
            }
        };

        self.persist(&checkpoint).await?;
        Ok(checkpoint.summary())
    }

    /// Delete one checkpoint; dependents are rewritten as full checkpoints first
    pub async fn delete_checkpoint(&self, checkpoint_id: &str) -> Result<bool> {
        let session = {
            let sessions = self.sessions.lock();
            sessions
                .iter()
                .find(|(_, list)| list.iter().any(|cp| cp.id == checkpoint_id))
                .map(|(session, _)| session.clone())
        };

        match session {
            Some(session) => {
                let ids = HashSet::from([checkpoint_id.to_string()]);
                Ok(!self.remove_checkpoints(&session, &ids).await?.is_empty())
            }
            None => self.storage.delete(checkpoint_id, None).await,
        }
    }

    /// Read a session's checkpoints from storage into memory
    ///
    /// Records already resident are kept as they are. Unreadable records are
    /// skipped with a warning. Returns the number of checkpoints added.
    pub async fn load_session(&self, session_id: &str) -> Result<usize> {
        let ids = self.storage.list_session(session_id).await?;
        let mut loaded = Vec::with_capacity(ids.len());

        for id in ids {
            match self.load_from_storage(&id, Some(session_id), true).await {
                Ok(Some(cp)) if cp.session_id != session_id => warn!(
                    session_id = %session_id,
                    checkpoint_id = %id,
                    owner = %cp.session_id,
                    "Skipping checkpoint recorded for another session"
                ),
                Ok(Some(cp)) => loaded.push(cp),
                Ok(None) => {}
                Err(e) => warn!(session_id = %session_id, checkpoint_id = %id, error = %e, "Skipping unreadable checkpoint"),
            }
        }

        let max_sequence = loaded.iter().map(|cp| cp.sequence).max();
        if let Some(max) = max_sequence {
            self.sequence.fetch_max(max + 1, Ordering::SeqCst);
        }

        let added = {
            let mut sessions = self.sessions.lock();
            let list = sessions.entry(session_id.to_string()).or_default();
            let known: HashSet<CheckpointId> = list.iter().map(|cp| cp.id.clone()).collect();
            let before = list.len();
            list.extend(loaded.into_iter().filter(|cp| !known.contains(&cp.id)));
            list.sort_by_key(|cp| (cp.timestamp, cp.sequence));
            list.len() - before
        };

        info!(session_id = %session_id, added, "Session loaded from storage");
        Ok(added)
    }

    async fn ensure_resident(&self, session_id: &str) -> Result<()> {
        let resident = self.sessions.lock().contains_key(session_id);
        if !resident {
            self.load_session(session_id).await?;
        }
        Ok(())
    }

    /// Remove age-expired checkpoints from every resident session
    pub async fn cleanup_old_checkpoints(&self) -> Result<CleanupReport> {
        let policy = RetentionPolicy::from_days(self.config.retention_days);
        let now = self.clock.now();

        let expired: Vec<(String, HashSet<CheckpointId>)> = {
            let sessions = self.sessions.lock();
            sessions
                .iter()
                .map(|(session, list)| (session.clone(), policy.select_expired(list, now)))
                .filter(|(_, ids)| !ids.is_empty())
                .collect()
        };

        let mut report = CleanupReport::default();
        for (session, ids) in expired {
            let removed = self.remove_checkpoints(&session, &ids).await?;
            if !removed.is_empty() {
                report.sessions += 1;
                report.removed += removed.len();
                report
                    .removed_ids
                    .extend(removed.into_iter().map(|cp| cp.id));
            }
        }

        info!(
            removed = report.removed,
            sessions = report.sessions,
            "Checkpoint cleanup complete"
        );
        self.emit(CheckpointEvent::CleanupComplete {
            removed: report.removed,
            sessions: report.sessions,
            timestamp: self.clock.now(),
        });
        Ok(report)
    }

    /// Resident checkpoints of a session, oldest first
    pub fn list_checkpoints(&self, session_id: &str) -> Vec<CheckpointSummary> {
        self.sessions
            .lock()
            .get(session_id)
            .map(|list| list.iter().map(Checkpoint::summary).collect())
            .unwrap_or_default()
    }

    pub fn latest_checkpoint(&self, session_id: &str) -> Option<CheckpointSummary> {
        self.latest_resident(session_id).map(|cp| cp.summary())
    }

    pub fn get_checkpoint(&self, checkpoint_id: &str) -> Option<Checkpoint> {
        self.sessions
            .lock()
            .values()
            .flat_map(|list| list.iter())
            .find(|cp| cp.id == checkpoint_id)
            .cloned()
    }

    /// Resident session ids
    pub fn sessions(&self) -> Vec<String> {
        self.sessions.lock().keys().cloned().collect()
    }

    pub fn current_state(&self, session_id: &str) -> Option<CheckpointState> {
        self.current.lock().get(session_id).cloned()
    }

    pub fn set_current_state(&self, session_id: &str, state: CheckpointState) {
        self.current.lock().insert(session_id.to_string(), state);
    }

    /// Every session with a cached current state
    pub fn cached_states(&self) -> Vec<(String, CheckpointState)> {
        self.current
            .lock()
            .iter()
            .map(|(session, state)| (session.clone(), state.clone()))
            .collect()
    }

    pub fn stats(&self) -> StoreStats {
        let sessions = self.sessions.lock();
        let mut stats = StoreStats {
            sessions: sessions.len(),
            ..Default::default()
        };
        for cp in sessions.values().flat_map(|list| list.iter()) {
            stats.checkpoints += 1;
            if cp.is_diff() {
                stats.diff_checkpoints += 1;
            } else {
                stats.full_checkpoints += 1;
            }
            if cp.is_milestone() {
                stats.milestones += 1;
            }
            if cp.compressed {
                stats.compressed += 1;
            }
            stats.total_bytes += cp.size_bytes;
        }
        stats
    }

    fn latest_resident(&self, session_id: &str) -> Option<Checkpoint> {
        self.sessions
            .lock()
            .get(session_id)?
            .iter()
            .max_by_key(|cp| (cp.timestamp, cp.sequence))
            .cloned()
    }

    /// Find a checkpoint in memory, then in storage
    async fn locate(
        &self,
        checkpoint_id: &str,
        session_hint: Option<&str>,
        validate: bool,
    ) -> Result<Option<Checkpoint>> {
        let resident = self.get_checkpoint(checkpoint_id);
        match resident {
            Some(cp) => {
                if validate {
                    self.codec.verify(&cp.id, &cp.payload, &cp.hash)?;
                }
                Ok(Some(cp))
            }
            None => {
                self.load_from_storage(checkpoint_id, session_hint, validate)
                    .await
            }
        }
    }

    async fn load_from_storage(
        &self,
        checkpoint_id: &str,
        session_hint: Option<&str>,
        validate: bool,
    ) -> Result<Option<Checkpoint>> {
        let Some(bytes) = self.storage.read(checkpoint_id, session_hint).await? else {
            return Ok(None);
        };
        let record: CheckpointRecord = serde_json::from_slice(&bytes)
            .map_err(|e| CheckpointError::integrity(checkpoint_id, e.to_string()))?;
        let payload = self
            .codec
            .decode(&record.id, &record.payload, &record.hash, validate)?;
        Ok(Some(record.into_checkpoint(payload)))
    }

    /// Replay the chain ending at `checkpoint`
    ///
    /// Returns the full state and the number of checkpoints in the chain,
    /// counting the full base.
    async fn reconstruct(
        &self,
        checkpoint: &Checkpoint,
        validate: bool,
    ) -> Result<(CheckpointState, usize)> {
        let mut chain = vec![checkpoint.clone()];
        let mut seen = HashSet::from([checkpoint.id.clone()]);

        let base = loop {
            let Some(tip) = chain.last() else {
                return Err(CheckpointError::integrity(&checkpoint.id, "empty chain"));
            };
            let diff_parent = match &tip.payload {
                CheckpointPayload::Full(state) => break state.clone(),
                CheckpointPayload::Diff(_) => tip.parent_id().map(str::to_string),
            };
            let Some(parent_id) = diff_parent else {
                return Err(CheckpointError::integrity(&tip.id, "diff checkpoint has no parent"));
            };
            if !seen.insert(parent_id.clone()) {
                return Err(CheckpointError::integrity(&tip.id, "cycle in parent chain"));
            }

            let child_id = tip.id.clone();
            let parent = self
                .locate(&parent_id, Some(&checkpoint.session_id), validate)
                .await?
                .ok_or_else(|| CheckpointError::ParentMissing {
                    checkpoint_id: child_id,
                    parent_id,
                })?;
            chain.push(parent);
        };

        let chain_len = chain.len();
        let mut state = base;
        for link in chain.iter().rev().skip(1) {
            if let CheckpointPayload::Diff(diff) = &link.payload {
                state = DiffEngine::apply(&state, diff)
                    .map_err(|e| CheckpointError::integrity(&link.id, e.to_string()))?;
            }
        }
        Ok((state, chain_len))
    }

    /// Re-encode and overwrite a checkpoint's record
    async fn persist(&self, checkpoint: &Checkpoint) -> Result<()> {
        let encoded = self.codec.encode(&checkpoint.payload)?;
        let record = checkpoint.to_record(encoded.stored);
        self.storage
            .write(
                &checkpoint.session_id,
                &checkpoint.id,
                serde_json::to_vec(&record)?,
            )
            .await
    }

    /// Remove checkpoints from a resident session and from storage
    ///
    /// Surviving diffs whose parent is being removed are rebuilt and stored as
    /// full checkpoints first, so no chain is left dangling.
    async fn remove_checkpoints(
        &self,
        session_id: &str,
        ids: &HashSet<CheckpointId>,
    ) -> Result<Vec<Checkpoint>> {
        let dependents: Vec<Checkpoint> = {
            let sessions = self.sessions.lock();
            sessions
                .get(session_id)
                .map(|list| {
                    list.iter()
                        .filter(|cp| !ids.contains(&cp.id))
                        .filter(|cp| cp.parent_id().is_some_and(|p| ids.contains(p)))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut ids = ids.clone();
        let mut rebased = Vec::with_capacity(dependents.len());
        for dependent in dependents {
            let dependent_id = dependent.id.clone();
            match self.rebase_to_full(dependent).await {
                Ok(cp) => rebased.push(cp),
                Err(e) => {
                    let kept = self.retain_ancestors(session_id, &dependent_id, &mut ids);
                    warn!(
                        session_id = %session_id,
                        checkpoint_id = %dependent_id,
                        kept,
                        error = %e,
                        "Could not rebase dependent checkpoint, keeping its parents"
                    );
                }
            }
        }

        let removed: Vec<Checkpoint> = {
            let mut sessions = self.sessions.lock();
            let Some(list) = sessions.get_mut(session_id) else {
                return Ok(Vec::new());
            };
            for cp in rebased {
                if let Some(slot) = list.iter_mut().find(|c| c.id == cp.id) {
                    *slot = cp;
                }
            }
            let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(list)
                .into_iter()
                .partition(|cp| ids.contains(&cp.id));
            *list = kept;
            removed
        };

        for cp in &removed {
            if let Err(e) = self.storage.delete(&cp.id, Some(session_id)).await {
                warn!(checkpoint_id = %cp.id, error = %e, "Failed to delete checkpoint record");
            }
        }
        Ok(removed)
    }

    /// Drop every resident ancestor of `checkpoint_id` from `ids`
    ///
    /// Returns how many were spared.
    fn retain_ancestors(
        &self,
        session_id: &str,
        checkpoint_id: &str,
        ids: &mut HashSet<CheckpointId>,
    ) -> usize {
        let sessions = self.sessions.lock();
        let Some(list) = sessions.get(session_id) else {
            return 0;
        };
        let parents: HashMap<&str, &str> = list
            .iter()
            .filter_map(|cp| cp.parent_id().map(|p| (cp.id.as_str(), p)))
            .collect();

        let mut kept = 0;
        let mut seen = HashSet::new();
        let mut cursor = parents.get(checkpoint_id).copied();
        while let Some(parent) = cursor {
            if !seen.insert(parent) {
                break;
            }
            if ids.remove(parent) {
                kept += 1;
            }
            cursor = parents.get(parent).copied();
        }
        kept
    }

    async fn rebase_to_full(&self, mut checkpoint: Checkpoint) -> Result<Checkpoint> {
        let (state, _) = self.reconstruct(&checkpoint, false).await?;
        checkpoint.payload = CheckpointPayload::Full(state);
        checkpoint.metadata.parent_checkpoint_id = None;

        let encoded = self.codec.encode(&checkpoint.payload)?;
        checkpoint.hash = encoded.hash;
        checkpoint.size_bytes = encoded.size_bytes;
        checkpoint.compressed = encoded.compressed;

        let record = checkpoint.to_record(encoded.stored);
        self.storage
            .write(
                &checkpoint.session_id,
                &checkpoint.id,
                serde_json::to_vec(&record)?,
            )
            .await?;

        debug!(checkpoint_id = %checkpoint.id, "Dependent checkpoint rewritten as full");
        Ok(checkpoint)
    }
}

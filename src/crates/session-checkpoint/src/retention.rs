//! Age-based checkpoint retention
//!
//! [`RetentionPolicy`] decides which checkpoints are past their age limit.
//! Milestones never are. [`RetentionManager`] runs the store's cleanup on a
//! fixed interval in the background.

use crate::checkpoint::{Checkpoint, CheckpointId};
use crate::error::Result;
use crate::store::{CheckpointStore, CleanupReport};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tooling::logging::timed;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_age: ChronoDuration,
}

impl RetentionPolicy {
    pub fn new(max_age: ChronoDuration) -> Self {
        Self { max_age }
    }

    pub fn from_days(days: u32) -> Self {
        Self::new(ChronoDuration::days(i64::from(days)))
    }

    /// Checkpoints taken before this instant are expired
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.max_age
    }

    pub fn is_expired(&self, checkpoint: &Checkpoint, now: DateTime<Utc>) -> bool {
        !checkpoint.is_milestone() && checkpoint.timestamp < self.cutoff(now)
    }

    pub fn select_expired(&self, checkpoints: &[Checkpoint], now: DateTime<Utc>) -> HashSet<CheckpointId> {
        checkpoints
            .iter()
            .filter(|cp| self.is_expired(cp, now))
            .map(|cp| cp.id.clone())
            .collect()
    }
}

/// Periodic cleanup driver
pub struct RetentionManager {
    store: Arc<CheckpointStore>,
    interval: Duration,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RetentionManager {
    /// Sweeps every `cleanup_interval` of the store's config
    pub fn new(store: Arc<CheckpointStore>) -> Self {
        let interval = store.config().cleanup_interval;
        Self::with_interval(store, interval)
    }

    pub fn with_interval(store: Arc<CheckpointStore>, interval: Duration) -> Self {
        Self {
            store,
            interval,
            handle: Mutex::new(None),
        }
    }

    pub async fn run_once(&self) -> Result<CleanupReport> {
        self.store.cleanup_old_checkpoints().await
    }

    /// Start the background sweep; no-op when already running
    ///
    /// The first sweep happens one interval after start.
    pub fn start(&self) {
        let mut handle = self.handle.lock();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let store = Arc::clone(&self.store);
        let period = self.interval;
        *handle = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = timed("checkpoint cleanup", store.cleanup_old_checkpoints()).await {
                    warn!(error = %e, "Checkpoint cleanup failed");
                }
            }
        }));
        info!(interval_ms = period.as_millis() as u64, "Retention sweep started");
    }

    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
            info!("Retention sweep stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

impl Drop for RetentionManager {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            handle.abort();
        }
    }
}

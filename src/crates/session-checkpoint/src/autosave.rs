//! Periodic auto-save
//!
//! Each session gets its own background task that asks a [`StateProvider`]
//! for the current state on every tick and stores it as an auto checkpoint.
//! A failed tick is logged and broadcast as
//! [`CheckpointEvent::AutoSaveError`]; the schedule keeps running.

use crate::checkpoint::CheckpointType;
use crate::events::CheckpointEvent;
use crate::state::CheckpointState;
use crate::store::CheckpointStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub const AUTO_SAVE_REASON: &str = "auto-save";
pub const SHUTDOWN_REASON: &str = "shutdown";

/// Supplies a session's current state on demand
#[async_trait]
pub trait StateProvider: Send + Sync {
    async fn capture(&self) -> anyhow::Result<CheckpointState>;
}

#[async_trait]
impl<F, Fut> StateProvider for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<CheckpointState>> + Send + 'static,
{
    async fn capture(&self) -> anyhow::Result<CheckpointState> {
        (self)().await
    }
}

pub struct AutoSaveScheduler {
    store: Arc<CheckpointStore>,
    interval: Duration,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl AutoSaveScheduler {
    /// Ticks every `auto_save_interval` of the store's config
    pub fn new(store: Arc<CheckpointStore>) -> Self {
        let interval = store.config().auto_save_interval;
        Self::with_interval(store, interval)
    }

    pub fn with_interval(store: Arc<CheckpointStore>, interval: Duration) -> Self {
        Self {
            store,
            interval,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start saving `session_id` every interval, first tick one interval from now
    ///
    /// Replaces a schedule already running for the session.
    pub fn start_auto_save<P>(&self, session_id: &str, provider: P)
    where
        P: StateProvider + 'static,
    {
        let store = Arc::clone(&self.store);
        let session = session_id.to_string();
        let period = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                save_once(&store, &session, &provider).await;
            }
        });

        if let Some(previous) = self
            .tasks
            .lock()
            .insert(session_id.to_string(), handle)
        {
            previous.abort();
        }

        info!(session_id = %session_id, interval_ms = period.as_millis() as u64, "Auto-save started");
        self.store.emit(CheckpointEvent::AutoSaveStarted {
            session_id: session_id.to_string(),
            interval_ms: period.as_millis() as u64,
            timestamp: self.store.now(),
        });
    }

    /// Returns `false` if no schedule was running for the session
    pub fn stop_auto_save(&self, session_id: &str) -> bool {
        let Some(handle) = self.tasks.lock().remove(session_id) else {
            return false;
        };
        handle.abort();
        self.stopped(session_id);
        true
    }

    /// Stop every schedule; returns how many were running
    pub fn stop_all_auto_save(&self) -> usize {
        let drained: Vec<(String, JoinHandle<()>)> = self.tasks.lock().drain().collect();
        for (session_id, handle) in &drained {
            handle.abort();
            self.stopped(session_id);
        }
        drained.len()
    }

    pub fn is_running(&self, session_id: &str) -> bool {
        self.tasks
            .lock()
            .get(session_id)
            .is_some_and(|h| !h.is_finished())
    }

    pub fn active_sessions(&self) -> Vec<String> {
        self.tasks.lock().keys().cloned().collect()
    }

    /// Stop all schedules, then take one final checkpoint of every session
    /// with a cached current state
    ///
    /// Failures are logged and skipped. Returns the number of checkpoints
    /// written.
    pub async fn shutdown(&self) -> usize {
        self.stop_all_auto_save();

        let mut saved = 0;
        for (session_id, state) in self.store.cached_states() {
            match self
                .store
                .create_checkpoint(&session_id, state, CheckpointType::Auto, None, Some(SHUTDOWN_REASON))
                .await
            {
                Ok(_) => saved += 1,
                Err(e) => warn!(session_id = %session_id, error = %e, "Final checkpoint failed"),
            }
        }

        info!(saved, "Auto-save shut down");
        saved
    }

    fn stopped(&self, session_id: &str) {
        debug!(session_id = %session_id, "Auto-save stopped");
        self.store.emit(CheckpointEvent::AutoSaveStopped {
            session_id: session_id.to_string(),
            timestamp: self.store.now(),
        });
    }
}

impl Drop for AutoSaveScheduler {
    fn drop(&mut self) {
        for (_, handle) in self.tasks.get_mut().drain() {
            handle.abort();
        }
    }
}

async fn save_once<P: StateProvider>(store: &CheckpointStore, session_id: &str, provider: &P) {
    let result = match provider.capture().await {
        Ok(state) => store
            .create_checkpoint(session_id, state, CheckpointType::Auto, None, Some(AUTO_SAVE_REASON))
            .await
            .map(|_| ())
            .map_err(anyhow::Error::from),
        Err(e) => Err(e.context("state provider failed")),
    };

    if let Err(e) = result {
        warn!(session_id = %session_id, error = %format!("{e:#}"), "Auto-save tick failed");
        store.emit(CheckpointEvent::AutoSaveError {
            session_id: session_id.to_string(),
            error: format!("{e:#}"),
            timestamp: store.now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CheckpointStoreConfig;

    fn scheduler() -> AutoSaveScheduler {
        let store = Arc::new(CheckpointStore::in_memory(CheckpointStoreConfig::default()).unwrap());
        AutoSaveScheduler::new(store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop_are_idempotent() {
        let scheduler = scheduler();
        assert_eq!(scheduler.interval(), Duration::from_secs(30));

        scheduler.start_auto_save("s1", || async { Ok::<_, anyhow::Error>(CheckpointState::new()) });
        assert!(scheduler.is_running("s1"));

        assert!(scheduler.stop_auto_save("s1"));
        assert!(!scheduler.stop_auto_save("s1"));
        assert!(!scheduler.is_running("s1"));
        assert_eq!(scheduler.stop_all_auto_save(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_schedule() {
        let scheduler = scheduler();
        scheduler.start_auto_save("s1", || async { Ok::<_, anyhow::Error>(CheckpointState::new()) });
        scheduler.start_auto_save("s1", || async { Ok::<_, anyhow::Error>(CheckpointState::new()) });

        assert_eq!(scheduler.active_sessions(), vec!["s1".to_string()]);
        assert_eq!(scheduler.stop_all_auto_save(), 1);
    }
}

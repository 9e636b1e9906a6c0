//! Per-operation circuit breakers
//!
//! ```text
//!           failures >= failure_threshold
//!   Closed ──────────────────────────────▶ Open
//!     ▲                                    │  ▲
//!     │ successes >= success_threshold     │  │ any failure
//!     │                  open_duration     ▼  │
//!     └──────────────────────────────── HalfOpen
//! ```
//!
//! The open → half-open move is lazy: it happens on the next access after
//! `open_duration` has elapsed. Times come from `tokio::time::Instant` so a
//! paused test runtime controls them.

use crate::config::CircuitBreakerConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// State of one operation's circuit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => f.write_str("closed"),
            CircuitState::Open => f.write_str("open"),
            CircuitState::HalfOpen => f.write_str("half-open"),
        }
    }
}

/// A state change produced by recording an outcome or by the open timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitTransition {
    Opened,
    HalfOpened,
    Closed,
}

/// Answer to "may the primary path run now?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitDecision {
    Allow,
    /// The circuit just moved to half-open; this call is a probe
    Probe,
    Reject { retry_after: Duration },
}

/// Point-in-time view of one circuit
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitSnapshot {
    pub operation: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure: Option<Instant>,
    pub last_success: Option<Instant>,
    pub opened_at: Option<Instant>,
}

#[derive(Debug, Clone)]
struct CircuitRecord {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    last_success: Option<Instant>,
    opened_at: Option<Instant>,
}

impl CircuitRecord {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            last_success: None,
            opened_at: None,
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.success_count = 0;
    }

    fn snapshot(&self, operation: &str) -> CircuitSnapshot {
        CircuitSnapshot {
            operation: operation.to_string(),
            state: self.state,
            failure_count: self.failure_count,
            success_count: self.success_count,
            last_failure: self.last_failure,
            last_success: self.last_success,
            opened_at: self.opened_at,
        }
    }
}

/// Owns the circuits of every operation name
///
/// Share one registry between guards with `Arc` to make them see the same
/// circuit health.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    circuits: Mutex<HashMap<String, CircuitRecord>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Decide whether the primary path may run, moving an expired open
    /// circuit to half-open
    pub fn check(&self, operation: &str) -> CircuitDecision {
        let mut circuits = self.circuits.lock();
        let Some(record) = circuits.get_mut(operation) else {
            return CircuitDecision::Allow;
        };

        match record.state {
            CircuitState::Closed | CircuitState::HalfOpen => CircuitDecision::Allow,
            CircuitState::Open => {
                if Self::advance_if_expired(&self.config, operation, record) {
                    CircuitDecision::Probe
                } else {
                    let elapsed = record.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                    CircuitDecision::Reject {
                        retry_after: self.config.open_duration.saturating_sub(elapsed),
                    }
                }
            }
        }
    }

    /// Apply the lazy open → half-open move without deciding anything else
    pub fn refresh(&self, operation: &str) -> Option<CircuitTransition> {
        let mut circuits = self.circuits.lock();
        let record = circuits.get_mut(operation)?;
        Self::advance_if_expired(&self.config, operation, record)
            .then_some(CircuitTransition::HalfOpened)
    }

    /// Record a successful primary (or counted fallback) execution
    pub fn record_success(&self, operation: &str) -> Option<CircuitTransition> {
        let now = Instant::now();
        let mut circuits = self.circuits.lock();
        let record = circuits
            .entry(operation.to_string())
            .or_insert_with(CircuitRecord::closed);
        record.last_success = Some(now);

        match record.state {
            CircuitState::Closed => {
                record.failure_count = 0;
                record.success_count = record.success_count.saturating_add(1);
                None
            }
            CircuitState::HalfOpen => {
                record.success_count += 1;
                if record.success_count >= self.config.success_threshold {
                    record.state = CircuitState::Closed;
                    record.failure_count = 0;
                    record.success_count = 0;
                    record.opened_at = None;
                    info!(operation = %operation, "Circuit closed");
                    Some(CircuitTransition::Closed)
                } else {
                    debug!(
                        operation = %operation,
                        successes = record.success_count,
                        needed = self.config.success_threshold,
                        "Half-open probe succeeded"
                    );
                    None
                }
            }
            // Only a probe after the open window can close the circuit
            CircuitState::Open => None,
        }
    }

    /// Stamp a success without touching counters or state
    pub fn note_success(&self, operation: &str) {
        if let Some(record) = self.circuits.lock().get_mut(operation) {
            record.last_success = Some(Instant::now());
        }
    }

    /// Record a failed or timed-out primary execution
    pub fn record_failure(&self, operation: &str) -> Option<CircuitTransition> {
        let now = Instant::now();
        let mut circuits = self.circuits.lock();
        let record = circuits
            .entry(operation.to_string())
            .or_insert_with(CircuitRecord::closed);
        record.last_failure = Some(now);
        record.failure_count = record.failure_count.saturating_add(1);

        match record.state {
            CircuitState::Closed => {
                record.success_count = 0;
                if record.failure_count >= self.config.failure_threshold {
                    record.open(now);
                    warn!(
                        operation = %operation,
                        failures = record.failure_count,
                        "Circuit opened"
                    );
                    Some(CircuitTransition::Opened)
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                record.open(now);
                warn!(operation = %operation, "Half-open probe failed, circuit re-opened");
                Some(CircuitTransition::Opened)
            }
            CircuitState::Open => None,
        }
    }

    /// Current view of a circuit, `None` if nothing was ever recorded
    pub fn snapshot(&self, operation: &str) -> Option<CircuitSnapshot> {
        self.circuits
            .lock()
            .get(operation)
            .map(|record| record.snapshot(operation))
    }

    pub fn state(&self, operation: &str) -> Option<CircuitState> {
        self.circuits.lock().get(operation).map(|r| r.state)
    }

    /// Forget a circuit entirely. Returns whether one existed.
    pub fn reset(&self, operation: &str) -> bool {
        let removed = self.circuits.lock().remove(operation).is_some();
        if removed {
            info!(operation = %operation, "Circuit reset");
        }
        removed
    }

    pub fn reset_all(&self) {
        self.circuits.lock().clear();
    }

    /// Operations whose circuit is currently open (not yet refreshed)
    pub fn open_circuits(&self) -> Vec<String> {
        let mut open: Vec<String> = self
            .circuits
            .lock()
            .iter()
            .filter(|(_, record)| record.state == CircuitState::Open)
            .map(|(name, _)| name.clone())
            .collect();
        open.sort();
        open
    }

    pub fn len(&self) -> usize {
        self.circuits.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn advance_if_expired(
        config: &CircuitBreakerConfig,
        operation: &str,
        record: &mut CircuitRecord,
    ) -> bool {
        if record.state != CircuitState::Open {
            return false;
        }
        let expired = record
            .opened_at
            .map(|opened| opened.elapsed() >= config.open_duration)
            .unwrap_or(true);
        if expired {
            record.state = CircuitState::HalfOpen;
            record.success_count = 0;
            info!(operation = %operation, "Circuit half-open, allowing probe");
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::new(CircuitBreakerConfig::default())
    }

    fn fail_n(registry: &CircuitBreakerRegistry, op: &str, n: u32) -> Vec<CircuitTransition> {
        (0..n).filter_map(|_| registry.record_failure(op)).collect()
    }

    #[test]
    fn test_unknown_operation_is_allowed_and_not_created() {
        let registry = registry();
        assert_eq!(registry.check("chat"), CircuitDecision::Allow);
        assert!(registry.snapshot("chat").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_opens_after_threshold() {
        let registry = registry();
        assert!(fail_n(&registry, "chat", 4).is_empty());
        assert_eq!(registry.state("chat"), Some(CircuitState::Closed));

        assert_eq!(
            registry.record_failure("chat"),
            Some(CircuitTransition::Opened)
        );
        assert_eq!(registry.state("chat"), Some(CircuitState::Open));
        assert!(matches!(
            registry.check("chat"),
            CircuitDecision::Reject { .. }
        ));
        assert_eq!(registry.open_circuits(), vec!["chat".to_string()]);
    }

    #[test]
    fn test_success_breaks_failure_streak() {
        let registry = registry();
        fail_n(&registry, "chat", 4);
        registry.record_success("chat");
        fail_n(&registry, "chat", 4);
        assert_eq!(registry.state("chat"), Some(CircuitState::Closed));
        assert_eq!(registry.snapshot("chat").unwrap().failure_count, 4);
    }

    #[test]
    fn test_circuits_are_independent() {
        let registry = registry();
        fail_n(&registry, "chat", 5);
        assert_eq!(registry.check("embed"), CircuitDecision::Allow);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_open_duration() {
        let registry = registry();
        fail_n(&registry, "chat", 5);

        tokio::time::advance(Duration::from_secs(29)).await;
        match registry.check("chat") {
            CircuitDecision::Reject { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(1))
            }
            other => panic!("expected reject, got {:?}", other),
        }

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(registry.check("chat"), CircuitDecision::Probe);
        assert_eq!(registry.state("chat"), Some(CircuitState::HalfOpen));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_closes_after_success_threshold() {
        let registry = registry();
        fail_n(&registry, "chat", 5);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(registry.refresh("chat"), Some(CircuitTransition::HalfOpened));

        assert_eq!(registry.record_success("chat"), None);
        assert_eq!(registry.state("chat"), Some(CircuitState::HalfOpen));
        assert_eq!(
            registry.record_success("chat"),
            Some(CircuitTransition::Closed)
        );

        let snapshot = registry.snapshot("chat").unwrap();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failure_count, 0);
        assert!(snapshot.opened_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_and_resets_timer() {
        let registry = registry();
        fail_n(&registry, "chat", 5);
        tokio::time::advance(Duration::from_secs(30)).await;
        registry.refresh("chat");
        registry.record_success("chat");

        assert_eq!(
            registry.record_failure("chat"),
            Some(CircuitTransition::Opened)
        );
        assert_eq!(registry.state("chat"), Some(CircuitState::Open));

        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(matches!(
            registry.check("chat"),
            CircuitDecision::Reject { .. }
        ));
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(registry.check("chat"), CircuitDecision::Probe);
    }

    #[test]
    fn test_success_while_open_changes_nothing() {
        let registry = registry();
        fail_n(&registry, "chat", 5);
        assert_eq!(registry.record_success("chat"), None);
        assert_eq!(registry.state("chat"), Some(CircuitState::Open));
        assert!(registry.snapshot("chat").unwrap().last_success.is_some());
    }

    #[test]
    fn test_note_success_keeps_streak() {
        let registry = registry();
        fail_n(&registry, "chat", 3);
        registry.note_success("chat");
        let snapshot = registry.snapshot("chat").unwrap();
        assert_eq!(snapshot.failure_count, 3);
        assert!(snapshot.last_success.is_some());
    }

    #[test]
    fn test_reset_removes_circuit() {
        let registry = registry();
        fail_n(&registry, "chat", 5);
        assert!(registry.reset("chat"));
        assert!(!registry.reset("chat"));
        assert_eq!(registry.check("chat"), CircuitDecision::Allow);
    }
}

//! Guard lifecycle events
//!
//! Events are advisory: they are broadcast to whoever subscribed and never
//! change the outcome of an execution.

use crate::context::ContextId;
use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GuardEvent {
    ExecutionStarted {
        context_id: ContextId,
        operation: String,
        timeout_ms: u64,
        max_attempts: u32,
        timestamp: i64,
    },
    /// An attempt exceeded its timeout
    Timeout {
        context_id: ContextId,
        operation: String,
        attempt: u32,
        timeout_ms: u64,
        timestamp: i64,
    },
    /// An attempt crossed its warning threshold and is still running
    Warning {
        context_id: ContextId,
        operation: String,
        attempt: u32,
        elapsed_ms: u64,
        timeout_ms: u64,
        timestamp: i64,
    },
    CircuitOpen {
        operation: String,
        failures: u32,
        timestamp: i64,
    },
    CircuitHalfOpen {
        operation: String,
        timestamp: i64,
    },
    CircuitClosed {
        operation: String,
        timestamp: i64,
    },
    /// Primary path skipped because the circuit is open
    CircuitRejected {
        context_id: ContextId,
        operation: String,
        retry_after_ms: u64,
        timestamp: i64,
    },
    ExecutionCancelled {
        context_id: ContextId,
        operation: String,
        timestamp: i64,
    },
}

impl GuardEvent {
    pub(crate) fn now() -> i64 {
        Utc::now().timestamp_millis()
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            GuardEvent::ExecutionStarted { timestamp, .. }
            | GuardEvent::Timeout { timestamp, .. }
            | GuardEvent::Warning { timestamp, .. }
            | GuardEvent::CircuitOpen { timestamp, .. }
            | GuardEvent::CircuitHalfOpen { timestamp, .. }
            | GuardEvent::CircuitClosed { timestamp, .. }
            | GuardEvent::CircuitRejected { timestamp, .. }
            | GuardEvent::ExecutionCancelled { timestamp, .. } => *timestamp,
        }
    }

    pub fn operation(&self) -> &str {
        match self {
            GuardEvent::ExecutionStarted { operation, .. }
            | GuardEvent::Timeout { operation, .. }
            | GuardEvent::Warning { operation, .. }
            | GuardEvent::CircuitOpen { operation, .. }
            | GuardEvent::CircuitHalfOpen { operation, .. }
            | GuardEvent::CircuitClosed { operation, .. }
            | GuardEvent::CircuitRejected { operation, .. }
            | GuardEvent::ExecutionCancelled { operation, .. } => operation,
        }
    }

    /// Kebab-case event name, e.g. `circuit-half-open`
    pub fn name(&self) -> &'static str {
        match self {
            GuardEvent::ExecutionStarted { .. } => "execution-started",
            GuardEvent::Timeout { .. } => "timeout",
            GuardEvent::Warning { .. } => "warning",
            GuardEvent::CircuitOpen { .. } => "circuit-open",
            GuardEvent::CircuitHalfOpen { .. } => "circuit-half-open",
            GuardEvent::CircuitClosed { .. } => "circuit-closed",
            GuardEvent::CircuitRejected { .. } => "circuit-rejected",
            GuardEvent::ExecutionCancelled { .. } => "execution-cancelled",
        }
    }

    pub fn description(&self) -> String {
        match self {
            GuardEvent::ExecutionStarted {
                operation,
                timeout_ms,
                max_attempts,
                ..
            } => format!(
                "Execution started: {} ({}ms, up to {} attempts)",
                operation, timeout_ms, max_attempts
            ),
            GuardEvent::Timeout {
                operation,
                attempt,
                timeout_ms,
                ..
            } => format!(
                "Attempt {} of {} timed out after {}ms",
                attempt, operation, timeout_ms
            ),
            GuardEvent::Warning {
                operation,
                attempt,
                elapsed_ms,
                timeout_ms,
                ..
            } => format!(
                "Attempt {} of {} still running after {}ms (timeout {}ms)",
                attempt, operation, elapsed_ms, timeout_ms
            ),
            GuardEvent::CircuitOpen {
                operation,
                failures,
                ..
            } => format!("Circuit opened: {} after {} failures", operation, failures),
            GuardEvent::CircuitHalfOpen { operation, .. } => {
                format!("Circuit half-open: {}", operation)
            }
            GuardEvent::CircuitClosed { operation, .. } => {
                format!("Circuit closed: {}", operation)
            }
            GuardEvent::CircuitRejected {
                operation,
                retry_after_ms,
                ..
            } => format!(
                "Circuit rejected: {} (retry in {}ms)",
                operation, retry_after_ms
            ),
            GuardEvent::ExecutionCancelled { operation, .. } => {
                format!("Execution cancelled: {}", operation)
            }
        }
    }
}

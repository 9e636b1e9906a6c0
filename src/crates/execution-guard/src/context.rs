//! Execution context tracking

use crate::cancel::CancelSignal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Identifier of a single guarded execution
pub type ContextId = String;

/// Lifecycle of a guarded execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Timeout,
    Error,
    Cancelled,
    /// Primary path failed, a fallback produced the result
    Fallback,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Pending | ExecutionStatus::Running)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Fallback)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::Error => "error",
            ExecutionStatus::Cancelled => "cancelled",
            ExecutionStatus::Fallback => "fallback",
        };
        f.write_str(s)
    }
}

/// Bookkeeping for one call to `execute_with_timeout`
///
/// Lives in the guard's active set until the call reaches a terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub id: ContextId,
    pub operation: String,
    pub started_at: DateTime<Utc>,
    /// Timeout of the current attempt
    pub timeout: Duration,
    pub status: ExecutionStatus,
    /// 1-based attempt number, 0 before the first attempt
    pub attempt: u32,
    pub max_attempts: u32,
    pub fallback_used: bool,
    pub metadata: HashMap<String, Value>,
}

impl ExecutionContext {
    pub fn new(
        operation: impl Into<String>,
        timeout: Duration,
        max_attempts: u32,
        metadata: HashMap<String, Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            operation: operation.into(),
            started_at: Utc::now(),
            timeout,
            status: ExecutionStatus::Pending,
            attempt: 0,
            max_attempts,
            fallback_used: false,
            metadata,
        }
    }
}

/// What the operation closure is told about the attempt it is running
#[derive(Debug, Clone)]
pub struct Attempt {
    pub context_id: ContextId,
    /// 1-based attempt number
    pub number: u32,
    pub max_attempts: u32,
    /// Time budget of this attempt
    pub timeout: Duration,
    /// Tripped when the caller cancels the execution
    pub cancel: CancelSignal,
}

impl Attempt {
    pub fn is_last(&self) -> bool {
        self.number >= self.max_attempts
    }
}

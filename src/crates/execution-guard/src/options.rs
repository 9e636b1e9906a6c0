//! Per-call execution options

use crate::fallback::AdHocFallback;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Overrides for a single `execute_with_timeout` call
///
/// Unset fields fall back to the guard's [`GuardConfig`](crate::GuardConfig).
#[derive(Debug)]
pub struct ExecuteOptions<T> {
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
    pub retry_delay: Option<Duration>,
    pub progressive_timeout: Option<bool>,
    pub timeout_multiplier: Option<f64>,
    pub enable_fallback: Option<bool>,
    pub fallback: Option<AdHocFallback<T>>,
    pub metadata: HashMap<String, Value>,
}

impl<T> Default for ExecuteOptions<T> {
    fn default() -> Self {
        Self {
            timeout: None,
            retries: None,
            retry_delay: None,
            progressive_timeout: None,
            timeout_multiplier: None,
            enable_fallback: None,
            fallback: None,
            metadata: HashMap::new(),
        }
    }
}

impl<T> ExecuteOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Grow each attempt's timeout by `multiplier`
    pub fn with_progressive_timeout(mut self, multiplier: f64) -> Self {
        self.progressive_timeout = Some(true);
        self.timeout_multiplier = Some(multiplier);
        self
    }

    pub fn without_fallback(mut self) -> Self {
        self.enable_fallback = Some(false);
        self
    }

    /// Try `fallback` before any registered provider
    pub fn with_fallback(mut self, fallback: AdHocFallback<T>) -> Self {
        self.enable_fallback = Some(true);
        self.fallback = Some(fallback);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

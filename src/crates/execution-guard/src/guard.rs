//! The execution guard
//!
//! [`ExecutionGuard::execute_with_timeout`] runs an operation under a time
//! budget:
//!
//! 1. The operation's circuit is consulted. An open circuit skips the primary
//!    path entirely.
//! 2. Up to `retries + 1` attempts run one after another. Each attempt is
//!    spawned and raced against its timeout, an advisory warning timer and
//!    cancellation. Failed attempts back off linearly.
//! 3. If every attempt failed, the ad-hoc fallback and then the registered
//!    providers are tried in priority order.
//!
//! Failures are reported in the returned [`ExecutionResult`], never raised.

use crate::cancel::CancelSignal;
use crate::circuit::{CircuitBreakerRegistry, CircuitDecision, CircuitSnapshot, CircuitTransition};
use crate::config::GuardConfig;
use crate::context::{Attempt, ContextId, ExecutionContext, ExecutionStatus};
use crate::error::{GuardError, Result};
use crate::events::GuardEvent;
use crate::fallback::{
    AdHocFallback, FallbackChain, FallbackProvider, FallbackRequest, ADHOC_FALLBACK_NAME,
};
use crate::options::ExecuteOptions;
use crate::timeout::{self, AttemptOutcome};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tooling::config::ConfigBuilder;
use tooling::logging::format_duration;
use tracing::{debug, info, warn};

/// Outcome of a guarded execution
#[derive(Debug)]
pub struct ExecutionResult<T> {
    pub context_id: ContextId,
    pub operation: String,
    pub success: bool,
    pub status: ExecutionStatus,
    pub data: Option<T>,
    pub error: Option<GuardError>,
    pub elapsed: Duration,
    /// Primary attempts made
    pub attempts: u32,
    pub fallback_used: bool,
    /// Name of the fallback that produced `data`
    pub fallback_provider: Option<String>,
    pub warnings: Vec<String>,
}

impl<T> ExecutionResult<T> {
    pub fn into_result(self) -> std::result::Result<T, GuardError> {
        match self.data {
            Some(value) => Ok(value),
            None => Err(self.error.unwrap_or_else(|| GuardError::Operation {
                operation: self.operation,
                message: "execution produced no result".into(),
            })),
        }
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|e| e.to_string())
    }
}

/// Counters across every execution a guard has run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GuardStats {
    pub total_executions: u64,
    pub successful: u64,
    pub failed: u64,
    /// Attempt-level timeouts
    pub timeouts: u64,
    pub fallback_successes: u64,
    pub cancelled: u64,
    pub circuit_rejections: u64,
    pub active_executions: usize,
    pub open_circuits: usize,
}

struct ActiveExecution {
    context: ExecutionContext,
    cancel: CancelSignal,
}

/// Per-call bookkeeping carried through to the result
struct Run {
    context_id: ContextId,
    operation: String,
    started: Instant,
    attempts: u32,
    warnings: Vec<String>,
}

enum FallbackOutcome<T> {
    Succeeded { provider: String, value: T },
    Exhausted { attempted: usize },
}

/// Runs operations under timeouts, retries, circuit breakers and fallbacks
///
/// `T` is the value operations (and fallbacks) produce. The guard owns its
/// fallback chain and active-execution table; the circuit registry may be
/// shared with other guards.
pub struct ExecutionGuard<T: Send + 'static = Value> {
    config: GuardConfig,
    circuits: Arc<CircuitBreakerRegistry>,
    fallbacks: RwLock<FallbackChain<T>>,
    active: Mutex<HashMap<ContextId, ActiveExecution>>,
    stats: Mutex<GuardStats>,
    events: broadcast::Sender<GuardEvent>,
}

impl<T: Send + 'static> std::fmt::Debug for ExecutionGuard<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionGuard")
            .field("config", &self.config)
            .field("fallbacks", &self.fallbacks.read().names())
            .field("active", &self.active.lock().len())
            .finish()
    }
}

impl<T: Send + 'static> ExecutionGuard<T> {
    /// Create a guard with its own circuit registry
    pub fn new(config: GuardConfig) -> Result<Self> {
        let circuits = Arc::new(CircuitBreakerRegistry::new(config.circuit.clone()));
        Self::with_circuits(config, circuits)
    }

    /// Create a guard over an existing registry
    ///
    /// Thresholds then come from the registry's own config, not
    /// `config.circuit`.
    pub fn with_circuits(config: GuardConfig, circuits: Arc<CircuitBreakerRegistry>) -> Result<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(config.event_capacity);
        Ok(Self {
            config,
            circuits,
            fallbacks: RwLock::new(FallbackChain::new()),
            active: Mutex::new(HashMap::new()),
            stats: Mutex::new(GuardStats::default()),
            events,
        })
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn circuits(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.circuits
    }

    /// Receive lifecycle events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<GuardEvent> {
        self.events.subscribe()
    }

    /// Register a provider, replacing one with the same name.
    /// Returns `true` if a provider was replaced.
    pub fn register_fallback<P>(&self, provider: P) -> bool
    where
        P: FallbackProvider<T> + 'static,
    {
        self.register_fallback_arc(Arc::new(provider))
    }

    pub fn register_fallback_arc(&self, provider: Arc<dyn FallbackProvider<T>>) -> bool {
        info!(
            provider = provider.name(),
            priority = provider.priority(),
            "Registered fallback provider"
        );
        self.fallbacks.write().register(provider)
    }

    pub fn remove_fallback(&self, name: &str) -> bool {
        self.fallbacks.write().remove(name)
    }

    pub fn fallback_names(&self) -> Vec<String> {
        self.fallbacks.read().names()
    }

    /// [`execute_with_timeout`](Self::execute_with_timeout) with default options
    pub async fn execute<F, Fut, E>(&self, operation_name: &str, operation: F) -> ExecutionResult<T>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        self.execute_with_timeout(operation_name, operation, ExecuteOptions::default())
            .await
    }

    /// Run `operation` under the guard
    ///
    /// `operation` is called once per attempt. Its future is spawned, so a
    /// timed-out attempt keeps running in the background and its result is
    /// discarded.
    pub async fn execute_with_timeout<F, Fut, E>(
        &self,
        operation_name: &str,
        mut operation: F,
        options: ExecuteOptions<T>,
    ) -> ExecutionResult<T>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let ExecuteOptions {
            timeout,
            retries,
            retry_delay,
            progressive_timeout,
            timeout_multiplier,
            enable_fallback,
            fallback,
            metadata,
        } = options;

        let hard_timeout = self.config.hard_timeout;
        let base_timeout = timeout
            .unwrap_or(self.config.default_timeout)
            .min(hard_timeout);
        let max_attempts = retries
            .unwrap_or(self.config.default_retries)
            .saturating_add(1);
        let retry_delay = retry_delay.unwrap_or(self.config.retry_delay);
        let progressive = progressive_timeout.unwrap_or(self.config.progressive_timeout);
        let multiplier = timeout_multiplier
            .unwrap_or(self.config.timeout_multiplier)
            .max(1.0);
        let fallback_enabled = enable_fallback.unwrap_or(self.config.enable_fallback);

        let context = ExecutionContext::new(operation_name, base_timeout, max_attempts, metadata);
        let request_metadata = context.metadata.clone();
        let cancel = CancelSignal::new();
        let mut run = Run {
            context_id: context.id.clone(),
            operation: operation_name.to_string(),
            started: Instant::now(),
            attempts: 0,
            warnings: Vec::new(),
        };

        self.active.lock().insert(
            run.context_id.clone(),
            ActiveExecution {
                context,
                cancel: cancel.clone(),
            },
        );
        self.stats.lock().total_executions += 1;
        self.emit(GuardEvent::ExecutionStarted {
            context_id: run.context_id.clone(),
            operation: run.operation.clone(),
            timeout_ms: base_timeout.as_millis() as u64,
            max_attempts,
            timestamp: GuardEvent::now(),
        });

        let mut last_error: Option<GuardError> = None;
        let mut circuit_rejected = false;
        let mut cancelled = false;

        match self.circuits.check(operation_name) {
            CircuitDecision::Allow => {}
            CircuitDecision::Probe => self.emit_transition(operation_name, CircuitTransition::HalfOpened),
            CircuitDecision::Reject { retry_after } => {
                circuit_rejected = true;
                self.stats.lock().circuit_rejections += 1;
                warn!(
                    operation = %operation_name,
                    retry_after = %format_duration(retry_after),
                    "Circuit open, skipping primary execution"
                );
                run.warnings.push(format!(
                    "circuit open for '{}', primary skipped (retry in {})",
                    operation_name,
                    format_duration(retry_after)
                ));
                self.emit(GuardEvent::CircuitRejected {
                    context_id: run.context_id.clone(),
                    operation: run.operation.clone(),
                    retry_after_ms: retry_after.as_millis() as u64,
                    timestamp: GuardEvent::now(),
                });
                last_error = Some(GuardError::CircuitOpen {
                    operation: run.operation.clone(),
                });
            }
        }

        if !circuit_rejected {
            for attempt in 1..=max_attempts {
                if cancel.is_cancelled() {
                    cancelled = true;
                    break;
                }

                let attempt_timeout = timeout::attempt_timeout(
                    base_timeout,
                    attempt,
                    multiplier,
                    hard_timeout,
                    progressive,
                );
                run.attempts = attempt;
                self.update_context(&run.context_id, |ctx| {
                    ctx.status = ExecutionStatus::Running;
                    ctx.attempt = attempt;
                    ctx.timeout = attempt_timeout;
                });
                debug!(
                    operation = %operation_name,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    timeout = %format_duration(attempt_timeout),
                    "Starting attempt"
                );

                let handle = tokio::spawn(operation(Attempt {
                    context_id: run.context_id.clone(),
                    number: attempt,
                    max_attempts,
                    timeout: attempt_timeout,
                    cancel: cancel.clone(),
                }));
                let warn_at = timeout::warning_threshold(attempt_timeout, self.config.warning_ratio);

                let outcome = {
                    let warnings = &mut run.warnings;
                    let context_id = &run.context_id;
                    timeout::race_attempt(handle, attempt_timeout, warn_at, &cancel, |elapsed| {
                        warn!(
                            operation = %operation_name,
                            attempt = attempt,
                            elapsed = %format_duration(elapsed),
                            timeout = %format_duration(attempt_timeout),
                            "Attempt exceeded warning threshold"
                        );
                        warnings.push(format!(
                            "attempt {} still running after {} (timeout {})",
                            attempt,
                            format_duration(elapsed),
                            format_duration(attempt_timeout)
                        ));
                        self.emit(GuardEvent::Warning {
                            context_id: context_id.clone(),
                            operation: operation_name.to_string(),
                            attempt,
                            elapsed_ms: elapsed.as_millis() as u64,
                            timeout_ms: attempt_timeout.as_millis() as u64,
                            timestamp: GuardEvent::now(),
                        });
                    })
                    .await
                };

                match outcome {
                    AttemptOutcome::Completed(value) => {
                        self.record_circuit_success(operation_name);
                        self.stats.lock().successful += 1;
                        return self.finish(run, ExecutionStatus::Completed, Some(value), None, None);
                    }
                    AttemptOutcome::TimedOut => {
                        self.stats.lock().timeouts += 1;
                        warn!(
                            operation = %operation_name,
                            attempt = attempt,
                            timeout = %format_duration(attempt_timeout),
                            "Attempt timed out"
                        );
                        self.emit(GuardEvent::Timeout {
                            context_id: run.context_id.clone(),
                            operation: run.operation.clone(),
                            attempt,
                            timeout_ms: attempt_timeout.as_millis() as u64,
                            timestamp: GuardEvent::now(),
                        });
                        self.record_circuit_failure(operation_name);
                        last_error = Some(GuardError::Timeout {
                            operation: run.operation.clone(),
                            timeout_ms: attempt_timeout.as_millis() as u64,
                        });
                    }
                    AttemptOutcome::Failed(message) => {
                        warn!(
                            operation = %operation_name,
                            attempt = attempt,
                            error = %message,
                            "Attempt failed"
                        );
                        self.record_circuit_failure(operation_name);
                        last_error = Some(GuardError::Operation {
                            operation: run.operation.clone(),
                            message,
                        });
                    }
                    AttemptOutcome::Cancelled => {
                        cancelled = true;
                        break;
                    }
                }

                if attempt < max_attempts {
                    let delay = timeout::retry_backoff(retry_delay, attempt, self.config.retry_jitter);
                    debug!(
                        operation = %operation_name,
                        attempt = attempt,
                        delay = %format_duration(delay),
                        "Retrying after delay"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => {
                            cancelled = true;
                            break;
                        }
                    }
                }
            }
        }

        if cancelled {
            info!(operation = %operation_name, context_id = %run.context_id, "Execution cancelled");
            self.stats.lock().cancelled += 1;
            self.emit(GuardEvent::ExecutionCancelled {
                context_id: run.context_id.clone(),
                operation: run.operation.clone(),
                timestamp: GuardEvent::now(),
            });
            let error = GuardError::Cancelled {
                operation: run.operation.clone(),
            };
            return self.finish(run, ExecutionStatus::Cancelled, None, Some(error), None);
        }

        let primary_error = last_error.unwrap_or_else(|| GuardError::Operation {
            operation: run.operation.clone(),
            message: "no attempt was made".into(),
        });
        let failure_status = if primary_error.is_timeout() {
            ExecutionStatus::Timeout
        } else {
            ExecutionStatus::Error
        };

        let mut final_error = primary_error.clone();
        if fallback_enabled {
            let request = FallbackRequest {
                operation: run.operation.clone(),
                context_id: run.context_id.clone(),
                attempts: run.attempts,
                primary_error: primary_error.clone(),
                circuit_rejected,
                metadata: request_metadata,
            };
            match self.run_fallbacks(request, fallback, &mut run.warnings).await {
                FallbackOutcome::Succeeded { provider, value } => {
                    info!(
                        operation = %operation_name,
                        provider = %provider,
                        "Fallback succeeded"
                    );
                    if self.config.fallback_success_resets_circuit {
                        self.record_circuit_success(operation_name);
                    } else {
                        self.circuits.note_success(operation_name);
                    }
                    self.update_context(&run.context_id, |ctx| ctx.fallback_used = true);
                    {
                        let mut stats = self.stats.lock();
                        stats.successful += 1;
                        stats.fallback_successes += 1;
                    }
                    return self.finish(run, ExecutionStatus::Fallback, Some(value), None, Some(provider));
                }
                FallbackOutcome::Exhausted { attempted: 0 } => {}
                FallbackOutcome::Exhausted { attempted } => {
                    final_error = GuardError::FallbackExhausted {
                        operation: run.operation.clone(),
                        attempted,
                        primary: primary_error.to_string(),
                    };
                }
            }
        }

        self.stats.lock().failed += 1;
        warn!(
            operation = %operation_name,
            attempts = run.attempts,
            error = %final_error,
            "Guarded execution failed"
        );
        self.finish(run, failure_status, None, Some(final_error), None)
    }

    /// Cancel one execution. Returns `false` if it is unknown or already
    /// cancelled.
    pub fn cancel(&self, context_id: &str) -> bool {
        let mut active = self.active.lock();
        match active.get_mut(context_id) {
            Some(execution) => {
                let first = execution.cancel.cancel();
                if first {
                    execution.context.status = ExecutionStatus::Cancelled;
                    debug!(context_id = %context_id, operation = %execution.context.operation, "Cancellation requested");
                }
                first
            }
            None => false,
        }
    }

    /// Cancel every active execution, returning how many were cancelled
    pub fn cancel_all(&self) -> usize {
        let mut active = self.active.lock();
        let mut count = 0;
        for execution in active.values_mut() {
            if execution.cancel.cancel() {
                execution.context.status = ExecutionStatus::Cancelled;
                count += 1;
            }
        }
        if count > 0 {
            info!(count = count, "Cancelled all active executions");
        }
        count
    }

    /// Snapshot of in-flight executions
    pub fn active_contexts(&self) -> Vec<ExecutionContext> {
        self.active
            .lock()
            .values()
            .map(|execution| execution.context.clone())
            .collect()
    }

    pub fn get_stats(&self) -> GuardStats {
        let mut stats = self.stats.lock().clone();
        stats.active_executions = self.active.lock().len();
        stats.open_circuits = self.circuits.open_circuits().len();
        stats
    }

    /// Current circuit for `operation`, applying the lazy half-open move
    pub fn get_circuit_state(&self, operation: &str) -> Option<CircuitSnapshot> {
        if let Some(transition) = self.circuits.refresh(operation) {
            self.emit_transition(operation, transition);
        }
        self.circuits.snapshot(operation)
    }

    pub fn reset_circuit(&self, operation: &str) -> bool {
        self.circuits.reset(operation)
    }

    async fn run_fallbacks(
        &self,
        request: FallbackRequest,
        adhoc: Option<AdHocFallback<T>>,
        warnings: &mut Vec<String>,
    ) -> FallbackOutcome<T> {
        let mut attempted = 0;

        if let Some(adhoc) = adhoc {
            attempted += 1;
            let limit = adhoc.timeout.unwrap_or(self.config.adhoc_fallback_timeout);
            match tokio::time::timeout(limit, adhoc.run(request.clone())).await {
                Ok(Ok(value)) => {
                    return FallbackOutcome::Succeeded {
                        provider: ADHOC_FALLBACK_NAME.to_string(),
                        value,
                    }
                }
                Ok(Err(err)) => {
                    warnings.push(format!("fallback '{}' failed: {}", ADHOC_FALLBACK_NAME, err))
                }
                Err(_) => warnings.push(format!(
                    "fallback '{}' timed out after {}",
                    ADHOC_FALLBACK_NAME,
                    format_duration(limit)
                )),
            }
        }

        let candidates = self.fallbacks.read().candidates(&request.operation);
        for provider in candidates {
            attempted += 1;
            let limit = provider.timeout();
            debug!(
                operation = %request.operation,
                provider = provider.name(),
                "Trying fallback provider"
            );
            match tokio::time::timeout(limit, provider.execute(&request)).await {
                Ok(Ok(value)) => {
                    return FallbackOutcome::Succeeded {
                        provider: provider.name().to_string(),
                        value,
                    }
                }
                Ok(Err(err)) => {
                    warn!(provider = provider.name(), error = %err, "Fallback provider failed");
                    warnings.push(format!("fallback '{}' failed: {}", provider.name(), err));
                }
                Err(_) => {
                    warn!(provider = provider.name(), "Fallback provider timed out");
                    warnings.push(format!(
                        "fallback '{}' timed out after {}",
                        provider.name(),
                        format_duration(limit)
                    ));
                }
            }
        }

        FallbackOutcome::Exhausted { attempted }
    }

    fn finish(
        &self,
        run: Run,
        status: ExecutionStatus,
        data: Option<T>,
        error: Option<GuardError>,
        fallback_provider: Option<String>,
    ) -> ExecutionResult<T> {
        self.active.lock().remove(&run.context_id);
        let elapsed = run.started.elapsed();
        debug!(
            operation = %run.operation,
            status = %status,
            attempts = run.attempts,
            elapsed = %format_duration(elapsed),
            "Guarded execution finished"
        );
        ExecutionResult {
            context_id: run.context_id,
            operation: run.operation,
            success: status.is_success(),
            status,
            data,
            error,
            elapsed,
            attempts: run.attempts,
            fallback_used: fallback_provider.is_some(),
            fallback_provider,
            warnings: run.warnings,
        }
    }

    fn update_context(&self, context_id: &str, update: impl FnOnce(&mut ExecutionContext)) {
        if let Some(execution) = self.active.lock().get_mut(context_id) {
            update(&mut execution.context);
        }
    }

    fn record_circuit_success(&self, operation: &str) {
        if let Some(transition) = self.circuits.record_success(operation) {
            self.emit_transition(operation, transition);
        }
    }

    fn record_circuit_failure(&self, operation: &str) {
        if let Some(transition) = self.circuits.record_failure(operation) {
            self.emit_transition(operation, transition);
        }
    }

    fn emit_transition(&self, operation: &str, transition: CircuitTransition) {
        let operation = operation.to_string();
        let timestamp = GuardEvent::now();
        let event = match transition {
            CircuitTransition::Opened => GuardEvent::CircuitOpen {
                failures: self
                    .circuits
                    .snapshot(&operation)
                    .map(|s| s.failure_count)
                    .unwrap_or_default(),
                operation,
                timestamp,
            },
            CircuitTransition::HalfOpened => GuardEvent::CircuitHalfOpen { operation, timestamp },
            CircuitTransition::Closed => GuardEvent::CircuitClosed { operation, timestamp },
        };
        self.emit(event);
    }

    fn emit(&self, event: GuardEvent) {
        debug!(event = event.name(), operation = event.operation(), "{}", event.description());
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::FnFallback;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn guard() -> ExecutionGuard<String> {
        ExecutionGuard::new(
            GuardConfig::default()
                .with_retry_delay(Duration::from_millis(10))
                .with_default_timeout(Duration::from_secs(1)),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_attempt() {
        let guard = guard();
        let result = guard
            .execute("greet", |_attempt| async { Ok::<_, String>("hi".to_string()) })
            .await;

        assert!(result.success);
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.attempts, 1);
        assert!(!result.fallback_used);
        assert_eq!(result.into_result().unwrap(), "hi");
        assert!(guard.active_contexts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_sees_attempt_numbers() {
        let guard = guard();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_op = seen.clone();

        let result = guard
            .execute_with_timeout(
                "flaky",
                move |attempt: Attempt| {
                    seen_in_op.lock().push((attempt.number, attempt.max_attempts));
                    async move {
                        if attempt.is_last() {
                            Ok("done".to_string())
                        } else {
                            Err("not yet")
                        }
                    }
                },
                ExecuteOptions::new().with_retries(2).without_fallback(),
            )
            .await;

        assert!(result.success);
        assert_eq!(*seen.lock(), vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_clamped_to_hard_ceiling() {
        let guard: ExecutionGuard<String> = ExecutionGuard::new(
            GuardConfig::default().with_hard_timeout(Duration::from_secs(2)),
        )
        .unwrap();

        let result = guard
            .execute_with_timeout(
                "stuck",
                |_a| std::future::pending::<std::result::Result<String, String>>(),
                ExecuteOptions::new()
                    .with_timeout(Duration::from_secs(60))
                    .with_retries(0)
                    .without_fallback(),
            )
            .await;

        assert_eq!(result.status, ExecutionStatus::Timeout);
        assert!(result.elapsed >= Duration::from_secs(2));
        assert!(result.elapsed < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_registered_fallback_used_after_exhaustion() {
        let guard = guard();
        guard.register_fallback(
            FnFallback::new("canned", |req: FallbackRequest| async move {
                Ok(format!("canned reply for {}", req.operation))
            })
            .with_priority(1),
        );

        let result = guard
            .execute_with_timeout(
                "chat",
                |_a| async { Err::<String, _>("model overloaded") },
                ExecuteOptions::new().with_retries(1),
            )
            .await;

        assert!(result.success);
        assert_eq!(result.status, ExecutionStatus::Fallback);
        assert_eq!(result.fallback_provider.as_deref(), Some("canned"));
        assert_eq!(result.data.as_deref(), Some("canned reply for chat"));
        assert_eq!(result.attempts, 2);
        assert_eq!(guard.get_stats().fallback_successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_adhoc_fallback_runs_before_registered() {
        let guard = guard();
        let registered_calls = Arc::new(AtomicU32::new(0));
        let counter = registered_calls.clone();
        guard.register_fallback(FnFallback::new("registered", move |_req| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok("registered".to_string()) }
        }));

        let result = guard
            .execute_with_timeout(
                "chat",
                |_a| async { Err::<String, _>("down") },
                ExecuteOptions::new()
                    .with_retries(0)
                    .with_fallback(AdHocFallback::new(|_req| async { Ok("adhoc".to_string()) })),
            )
            .await;

        assert_eq!(result.fallback_provider.as_deref(), Some(ADHOC_FALLBACK_NAME));
        assert_eq!(registered_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fallbacks_report_exhaustion() {
        let guard = guard();
        guard.register_fallback(FnFallback::new("broken", |_req| async {
            Err::<String, _>(anyhow::anyhow!("cache miss"))
        }));
        guard.register_fallback(
            FnFallback::new("slow", |_req| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok("late".to_string())
            })
            .with_timeout(Duration::from_millis(100)),
        );

        let result = guard
            .execute_with_timeout(
                "chat",
                |_a| async { Err::<String, _>("down") },
                ExecuteOptions::new().with_retries(0),
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.status, ExecutionStatus::Error);
        match result.error.clone().unwrap() {
            GuardError::FallbackExhausted { attempted, .. } => assert_eq!(attempted, 2),
            other => panic!("unexpected error {:?}", other),
        }
        assert!(result.warnings.iter().any(|w| w.contains("cache miss")));
        assert!(result.warnings.iter().any(|w| w.contains("'slow' timed out")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_fallback() {
        let guard = guard();
        guard.register_fallback(FnFallback::new("canned", |_req| async { Ok("x".to_string()) }));
        assert!(guard.remove_fallback("canned"));
        assert!(!guard.remove_fallback("canned"));

        let result = guard
            .execute_with_timeout(
                "chat",
                |_a| async { Err::<String, _>("down") },
                ExecuteOptions::new().with_retries(0),
            )
            .await;
        assert!(!result.fallback_used);
        assert!(matches!(result.error, Some(GuardError::Operation { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_emitted_for_started_and_timeout() {
        let guard = guard();
        let mut events = guard.subscribe();

        guard
            .execute_with_timeout(
                "stuck",
                |_a| std::future::pending::<std::result::Result<String, String>>(),
                ExecuteOptions::new().with_retries(0).without_fallback(),
            )
            .await;

        let mut names = Vec::new();
        while let Ok(event) = events.try_recv() {
            names.push(event.name());
        }
        assert_eq!(names, vec!["execution-started", "warning", "timeout"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_success_can_leave_streak_alone() {
        let mut config = GuardConfig::default().with_retry_delay(Duration::from_millis(1));
        config.fallback_success_resets_circuit = false;
        let guard: ExecutionGuard<String> = ExecutionGuard::new(config).unwrap();
        guard.register_fallback(FnFallback::new("canned", |_req| async { Ok("x".to_string()) }));

        for _ in 0..5 {
            let result = guard
                .execute_with_timeout(
                    "chat",
                    |_a| async { Err::<String, _>("down") },
                    ExecuteOptions::new().with_retries(0),
                )
                .await;
            assert!(result.fallback_used);
        }

        let snapshot = guard.get_circuit_state("chat").unwrap();
        assert_eq!(snapshot.state, crate::CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_config_rejected() {
        let mut config = GuardConfig::default();
        config.warning_ratio = 2.0;
        assert!(matches!(
            ExecutionGuard::<String>::new(config),
            Err(GuardError::InvalidConfig(_))
        ));
    }
}

//! Execution guard
//!
//! Bounded-time execution for calls that may hang or fail (model requests,
//! tool invocations). A guarded call gets:
//!
//! - a per-attempt timeout, optionally growing with each retry
//! - linear backoff between attempts
//! - a per-operation circuit breaker that stops hammering a failing dependency
//! - a priority-ordered chain of fallback providers once the primary gives up
//!
//! # Example
//!
//! ```rust,ignore
//! use execution_guard::{ExecuteOptions, ExecutionGuard, FnFallback, GuardConfig};
//! use std::time::Duration;
//!
//! let guard: ExecutionGuard<String> = ExecutionGuard::new(GuardConfig::default())?;
//! guard.register_fallback(FnFallback::new("canned", |_req| async {
//!     Ok("Service is busy, please retry shortly.".to_string())
//! }));
//!
//! let result = guard
//!     .execute_with_timeout(
//!         "chat.completion",
//!         |attempt| async move { client.complete(prompt, attempt.timeout).await },
//!         ExecuteOptions::new().with_timeout(Duration::from_secs(10)).with_retries(2),
//!     )
//!     .await;
//! ```

pub mod cancel;
pub mod circuit;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod fallback;
pub mod guard;
pub mod options;
pub mod timeout;

pub use cancel::CancelSignal;
pub use circuit::{
    CircuitBreakerRegistry, CircuitDecision, CircuitSnapshot, CircuitState, CircuitTransition,
};
pub use config::{CircuitBreakerConfig, GuardConfig};
pub use context::{Attempt, ContextId, ExecutionContext, ExecutionStatus};
pub use error::{GuardError, Result};
pub use events::GuardEvent;
pub use fallback::{
    AdHocFallback, FallbackChain, FallbackProvider, FallbackRequest, FnFallback,
    ADHOC_FALLBACK_NAME,
};
pub use guard::{ExecutionGuard, ExecutionResult, GuardStats};
pub use options::ExecuteOptions;

//! Fallback providers and the priority-ordered chain

use crate::context::ContextId;
use crate::error::GuardError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Name reported when the caller-supplied ad-hoc fallback wins
pub const ADHOC_FALLBACK_NAME: &str = "adhoc";

/// What a fallback is told about the failed primary execution
#[derive(Debug, Clone)]
pub struct FallbackRequest {
    pub operation: String,
    pub context_id: ContextId,
    /// Primary attempts actually made (0 when the circuit rejected them)
    pub attempts: u32,
    pub primary_error: GuardError,
    pub circuit_rejected: bool,
    pub metadata: HashMap<String, Value>,
}

/// An alternative way to produce an operation's result
#[async_trait]
pub trait FallbackProvider<T: Send + 'static>: Send + Sync {
    fn name(&self) -> &str;

    /// Lower runs first
    fn priority(&self) -> i32 {
        100
    }

    /// Budget for a single `execute` call
    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    /// Whether this provider applies to `operation`
    fn can_handle(&self, _operation: &str) -> bool {
        true
    }

    async fn execute(&self, request: &FallbackRequest) -> anyhow::Result<T>;
}

type Executor<T> = Arc<dyn Fn(FallbackRequest) -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>;
type Capability = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Closure-backed provider
///
/// ```rust,ignore
/// guard.register_fallback(
///     FnFallback::new("cached-summary", |req| async move { cache.get(&req.operation) })
///         .with_priority(10)
///         .for_prefix("summarize"),
/// );
/// ```
pub struct FnFallback<T> {
    name: String,
    priority: i32,
    timeout: Duration,
    capability: Option<Capability>,
    executor: Executor<T>,
}

impl<T: Send + 'static> FnFallback<T> {
    pub fn new<F, Fut>(name: impl Into<String>, executor: F) -> Self
    where
        F: Fn(FallbackRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            name: name.into(),
            priority: 100,
            timeout: Duration::from_secs(5),
            capability: None,
            executor: Arc::new(move |request| -> BoxFuture<'static, anyhow::Result<T>> {
                Box::pin(executor(request))
            }),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_capability<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.capability = Some(Arc::new(predicate));
        self
    }

    /// Only handle operations whose name starts with `prefix`
    pub fn for_prefix(self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.with_capability(move |operation| operation.starts_with(&prefix))
    }
}

impl<T> std::fmt::Debug for FnFallback<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnFallback")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[async_trait]
impl<T: Send + 'static> FallbackProvider<T> for FnFallback<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn can_handle(&self, operation: &str) -> bool {
        self.capability
            .as_ref()
            .map(|predicate| predicate(operation))
            .unwrap_or(true)
    }

    async fn execute(&self, request: &FallbackRequest) -> anyhow::Result<T> {
        (self.executor)(request.clone()).await
    }
}

/// One-off fallback passed with a single call
pub struct AdHocFallback<T> {
    executor: Box<dyn FnOnce(FallbackRequest) -> BoxFuture<'static, anyhow::Result<T>> + Send>,
    pub(crate) timeout: Option<Duration>,
}

impl<T: Send + 'static> AdHocFallback<T> {
    pub fn new<F, Fut>(executor: F) -> Self
    where
        F: FnOnce(FallbackRequest) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            executor: Box::new(move |request| -> BoxFuture<'static, anyhow::Result<T>> {
                Box::pin(executor(request))
            }),
            timeout: None,
        }
    }

    /// Override the guard's `adhoc_fallback_timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn run(self, request: FallbackRequest) -> BoxFuture<'static, anyhow::Result<T>> {
        (self.executor)(request)
    }
}

impl<T> std::fmt::Debug for AdHocFallback<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdHocFallback")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Registered providers, kept sorted by ascending priority
pub struct FallbackChain<T: Send + 'static> {
    providers: Vec<Arc<dyn FallbackProvider<T>>>,
}

impl<T: Send + 'static> Default for FallbackChain<T> {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
        }
    }
}

impl<T: Send + 'static> FallbackChain<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider, replacing any provider with the same name.
    /// Returns `true` if one was replaced.
    pub fn register(&mut self, provider: Arc<dyn FallbackProvider<T>>) -> bool {
        let replaced = self.remove(provider.name());
        self.providers.push(provider);
        // Stable: equal priorities keep registration order
        self.providers.sort_by_key(|p| p.priority());
        replaced
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.providers.len();
        self.providers.retain(|p| p.name() != name);
        self.providers.len() != before
    }

    /// Providers willing to handle `operation`, in the order to try them
    pub fn candidates(&self, operation: &str) -> Vec<Arc<dyn FallbackProvider<T>>> {
        self.providers
            .iter()
            .filter(|p| p.can_handle(operation))
            .cloned()
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(name: &str, priority: i32) -> Arc<dyn FallbackProvider<String>> {
        let label = name.to_string();
        Arc::new(
            FnFallback::new(name, move |_req| {
                let label = label.clone();
                async move { Ok(label) }
            })
            .with_priority(priority),
        )
    }

    fn request(operation: &str) -> FallbackRequest {
        FallbackRequest {
            operation: operation.to_string(),
            context_id: "ctx".into(),
            attempts: 1,
            primary_error: GuardError::Operation {
                operation: operation.to_string(),
                message: "boom".into(),
            },
            circuit_rejected: false,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_chain_orders_by_priority() {
        let mut chain = FallbackChain::new();
        chain.register(provider("slow-model", 20));
        chain.register(provider("cache", 1));
        chain.register(provider("static", 20));

        assert_eq!(chain.names(), vec!["cache", "slow-model", "static"]);
    }

    #[test]
    fn test_register_same_name_replaces() {
        let mut chain = FallbackChain::new();
        assert!(!chain.register(provider("cache", 5)));
        assert!(chain.register(provider("cache", 1)));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_remove() {
        let mut chain = FallbackChain::new();
        chain.register(provider("cache", 5));
        assert!(chain.remove("cache"));
        assert!(!chain.remove("cache"));
        assert!(chain.is_empty());
    }

    #[test]
    fn test_capability_filters_candidates() {
        let mut chain: FallbackChain<String> = FallbackChain::new();
        chain.register(Arc::new(
            FnFallback::new("summaries", |_req| async { Ok("short".to_string()) })
                .for_prefix("summarize"),
        ));
        chain.register(provider("generic", 50));

        let names = |op: &str| -> Vec<String> {
            chain
                .candidates(op)
                .iter()
                .map(|p| p.name().to_string())
                .collect()
        };
        assert_eq!(names("summarize.thread"), vec!["generic", "summaries"]);
        assert_eq!(names("embed"), vec!["generic"]);
    }

    #[tokio::test]
    async fn test_fn_fallback_receives_request() {
        let fallback = FnFallback::new("echo", |req: FallbackRequest| async move {
            Ok(format!("{}:{}", req.operation, req.attempts))
        });
        let out = fallback.execute(&request("chat")).await.unwrap();
        assert_eq!(out, "chat:1");
    }

    #[tokio::test]
    async fn test_adhoc_runs_once() {
        let adhoc = AdHocFallback::new(|req: FallbackRequest| async move {
            Ok::<_, anyhow::Error>(req.operation.len())
        })
        .with_timeout(Duration::from_millis(10));
        assert_eq!(adhoc.timeout, Some(Duration::from_millis(10)));
        assert_eq!(adhoc.run(request("chat")).await.unwrap(), 4);
    }
}

//! Guard and circuit breaker configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tooling::config::{
    load_config_file, override_bool, override_duration, override_parse, ConfigBuilder,
};
use tooling::ToolingError;

/// Prefix for `GUARD_*` environment overrides
pub const ENV_PREFIX: &str = "GUARD_";

/// Circuit breaker thresholds, shared by every operation in a registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a closed circuit
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close the circuit
    pub success_threshold: u32,
    /// How long an open circuit rejects before allowing a probe
    #[serde(with = "duration_ms")]
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_duration: Duration::from_secs(30),
        }
    }
}

impl ConfigBuilder for CircuitBreakerConfig {
    fn validate(&self) -> tooling::Result<()> {
        if self.failure_threshold == 0 || self.success_threshold == 0 {
            return Err(ToolingError::Config(
                "circuit thresholds must be at least 1".into(),
            ));
        }
        Ok(())
    }

    fn apply_env(&mut self, prefix: &str) -> tooling::Result<()> {
        override_parse(&mut self.failure_threshold, prefix, "circuit_failure_threshold")?;
        override_parse(&mut self.success_threshold, prefix, "circuit_success_threshold")?;
        override_duration(&mut self.open_duration, prefix, "circuit_open_duration")
    }
}

/// Execution guard defaults
///
/// Per-call [`ExecuteOptions`](crate::ExecuteOptions) override most of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Timeout for an attempt when the caller gives none
    #[serde(with = "duration_ms")]
    pub default_timeout: Duration,
    /// Ceiling no attempt timeout may exceed
    #[serde(with = "duration_ms")]
    pub hard_timeout: Duration,
    /// Fraction of the attempt timeout at which a warning is raised
    pub warning_ratio: f64,
    pub default_retries: u32,
    /// Base of the linear backoff (`retry_delay * attempt`)
    #[serde(with = "duration_ms")]
    pub retry_delay: Duration,
    /// Scale each backoff by a random factor in 0.5..=1.5
    pub retry_jitter: bool,
    pub progressive_timeout: bool,
    pub timeout_multiplier: f64,
    pub enable_fallback: bool,
    /// Budget for a caller-supplied ad-hoc fallback
    #[serde(with = "duration_ms")]
    pub adhoc_fallback_timeout: Duration,
    /// Whether a fallback success counts as a circuit success
    pub fallback_success_resets_circuit: bool,
    /// Capacity of the lifecycle event channel
    pub event_capacity: usize,
    pub circuit: CircuitBreakerConfig,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            hard_timeout: Duration::from_secs(120),
            warning_ratio: 0.8,
            default_retries: 2,
            retry_delay: Duration::from_secs(1),
            retry_jitter: false,
            progressive_timeout: false,
            timeout_multiplier: 1.5,
            enable_fallback: true,
            adhoc_fallback_timeout: Duration::from_secs(5),
            fallback_success_resets_circuit: true,
            event_capacity: 256,
            circuit: CircuitBreakerConfig::default(),
        }
    }
}

impl GuardConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_hard_timeout(mut self, timeout: Duration) -> Self {
        self.hard_timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.default_retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_progressive_timeout(mut self, multiplier: f64) -> Self {
        self.progressive_timeout = true;
        self.timeout_multiplier = multiplier;
        self
    }

    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.enable_fallback = enabled;
        self
    }

    pub fn from_file(path: impl AsRef<Path>) -> tooling::Result<Self> {
        let config: Self = load_config_file(path)?;
        config.with_env_overrides(ENV_PREFIX)
    }

    pub fn with_circuit(mut self, circuit: CircuitBreakerConfig) -> Self {
        self.circuit = circuit;
        self
    }
}

impl ConfigBuilder for GuardConfig {
    fn validate(&self) -> tooling::Result<()> {
        if self.hard_timeout.is_zero() || self.default_timeout.is_zero() {
            return Err(ToolingError::Config("timeouts must be non-zero".into()));
        }
        if !(self.warning_ratio > 0.0 && self.warning_ratio < 1.0) {
            return Err(ToolingError::Config(format!(
                "warning_ratio must be in (0, 1), got {}",
                self.warning_ratio
            )));
        }
        if !(self.timeout_multiplier >= 1.0 && self.timeout_multiplier.is_finite()) {
            return Err(ToolingError::Config(format!(
                "timeout_multiplier must be >= 1.0, got {}",
                self.timeout_multiplier
            )));
        }
        if self.event_capacity == 0 {
            return Err(ToolingError::Config("event_capacity must be positive".into()));
        }
        self.circuit.validate()
    }

    fn apply_env(&mut self, prefix: &str) -> tooling::Result<()> {
        override_duration(&mut self.default_timeout, prefix, "default_timeout")?;
        override_duration(&mut self.hard_timeout, prefix, "hard_timeout")?;
        override_parse(&mut self.warning_ratio, prefix, "warning_ratio")?;
        override_parse(&mut self.default_retries, prefix, "default_retries")?;
        override_duration(&mut self.retry_delay, prefix, "retry_delay")?;
        override_bool(&mut self.retry_jitter, prefix, "retry_jitter")?;
        override_bool(&mut self.progressive_timeout, prefix, "progressive_timeout")?;
        override_parse(&mut self.timeout_multiplier, prefix, "timeout_multiplier")?;
        override_bool(&mut self.enable_fallback, prefix, "enable_fallback")?;
        override_duration(&mut self.adhoc_fallback_timeout, prefix, "adhoc_fallback_timeout")?;
        override_bool(
            &mut self.fallback_success_resets_circuit,
            prefix,
            "fallback_success_resets_circuit",
        )?;
        override_parse(&mut self.event_capacity, prefix, "event_capacity")?;
        self.circuit.apply_env(prefix)
    }
}

/// Durations travel as integer milliseconds in config files
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

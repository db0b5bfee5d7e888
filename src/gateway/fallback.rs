//! Failure tracking and circuit breaking for LLM providers.
//!
//! The manager keeps one health record per provider. Five consecutive
//! failures open the circuit; once the recovery window has elapsed without
//! further failures the provider is allowed a half-open probe, and the first
//! success closes the circuit again. All clocks are `tokio::time::Instant`
//! so tests can drive recovery with a paused runtime clock.

use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::time::Instant;

use super::provider::FailureKind;

/// Consecutive failures that open the circuit.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
/// Quiet period after which an open circuit admits a half-open probe.
pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(300);
/// Exponential back-off multiplier cap (2^5 = 32).
const MAX_BACKOFF_MULTIPLIER: u32 = 32;

/// Health record for a single provider.
#[derive(Clone, Debug)]
pub struct ProviderHealth {
    pub healthy: bool,
    pub failure_count: u64,
    pub consecutive_failures: u32,
    pub last_failure: Option<Instant>,
    pub last_success: Option<Instant>,
    pub failures_by_kind: FxHashMap<FailureKind, u64>,
}

impl Default for ProviderHealth {
    fn default() -> Self {
        Self {
            healthy: true,
            failure_count: 0,
            consecutive_failures: 0,
            last_failure: None,
            last_success: None,
            failures_by_kind: FxHashMap::default(),
        }
    }
}

/// Per-provider circuit breaker and back-off calculator.
pub struct FallbackManager {
    health: RwLock<FxHashMap<String, ProviderHealth>>,
    failure_threshold: u32,
    recovery_timeout: Duration,
}

impl Default for FallbackManager {
    fn default() -> Self {
        Self::new()
    }
}

impl FallbackManager {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DEFAULT_FAILURE_THRESHOLD, DEFAULT_RECOVERY_TIMEOUT)
    }

    /// Override the circuit parameters. Mainly for tests.
    #[must_use]
    pub fn with_config(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            health: RwLock::new(FxHashMap::default()),
            failure_threshold,
            recovery_timeout,
        }
    }

    /// Record a failed call. Opens the circuit on the threshold-th
    /// consecutive failure.
    pub fn record_failure(&self, provider: &str, kind: FailureKind) {
        let mut health = self.health.write();
        let record = health.entry(provider.to_string()).or_default();
        record.failure_count += 1;
        record.consecutive_failures += 1;
        record.last_failure = Some(Instant::now());
        *record.failures_by_kind.entry(kind).or_insert(0) += 1;

        if record.consecutive_failures >= self.failure_threshold && record.healthy {
            record.healthy = false;
            tracing::warn!(
                provider,
                consecutive = record.consecutive_failures,
                %kind,
                "circuit opened for provider"
            );
        }
    }

    /// Record a successful call; closes the circuit if it was open.
    pub fn record_success(&self, provider: &str) {
        let mut health = self.health.write();
        let record = health.entry(provider.to_string()).or_default();
        record.consecutive_failures = 0;
        record.last_success = Some(Instant::now());
        if !record.healthy {
            record.healthy = true;
            tracing::info!(provider, "circuit closed, provider recovered");
        }
    }

    /// Whether `provider` may be tried right now.
    ///
    /// Unknown providers are healthy. An open circuit admits a half-open
    /// probe once the recovery window has elapsed since the last failure.
    #[must_use]
    pub fn is_healthy(&self, provider: &str) -> bool {
        let health = self.health.read();
        let Some(record) = health.get(provider) else {
            return true;
        };
        if record.healthy {
            return true;
        }
        match record.last_failure {
            Some(last) if last.elapsed() > self.recovery_timeout => {
                tracing::info!(provider, "circuit half-open, allowing probe");
                true
            }
            _ => false,
        }
    }

    /// Whether another provider should be tried after this failure.
    #[must_use]
    pub fn should_fallback(&self, kind: FailureKind) -> bool {
        kind.is_retryable()
    }

    /// Back-off before retrying `provider`: the kind's base delay doubled
    /// per consecutive failure, capped at 32x the base.
    #[must_use]
    pub fn retry_delay(&self, provider: &str, kind: FailureKind) -> Duration {
        let consecutive = self
            .health
            .read()
            .get(provider)
            .map_or(0, |r| r.consecutive_failures);
        let multiplier = 2u32
            .saturating_pow(consecutive)
            .min(MAX_BACKOFF_MULTIPLIER);
        kind.base_delay() * multiplier
    }

    /// Snapshot of one provider's health record.
    #[must_use]
    pub fn health_of(&self, provider: &str) -> ProviderHealth {
        self.health.read().get(provider).cloned().unwrap_or_default()
    }

    /// Clear a provider's record entirely.
    pub fn reset(&self, provider: &str) {
        self.health.write().remove(provider);
    }
}

//! [`CostGuard`] – per-shard LLM call budgeting.
//!
//! Enforces (a) max calls per minute, (b) max calls per session, (c) an
//! idle-since-last-call timeout, (d) exponential backoff after errors
//! (`base * 2^min(errors-1, 6)`, capped at 60s).

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use governor::clock::{Clock, DefaultClock, QuantaInstant};
use governor::{Quota, RateLimiter};
use tokio::sync::RwLock;
use tokio::time::Instant;

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    DefaultClock,
    governor::middleware::NoOpMiddleware<QuantaInstant>,
>;

/// Per-shard cost guard configuration. All thresholds are configurable.
#[derive(Debug, Clone)]
pub struct CostGuardConfig {
    pub max_calls_per_minute: u32,
    pub max_calls_per_session: u32,
    pub idle_timeout: Duration,
    /// Base for the exponential backoff computation; one second matches
    /// this workspace's other circuit-breaker granularities.
    pub backoff_base: Duration,
    /// `Perception::ParseIntentWithGCD`'s retry budget, when this guard
    /// belongs to a Perception shard.
    pub max_validation_retries: Option<u32>,
}

impl Default for CostGuardConfig {
    fn default() -> Self {
        CostGuardConfig {
            max_calls_per_minute: 20,
            max_calls_per_session: 500,
            idle_timeout: Duration::from_secs(300),
            backoff_base: Duration::from_secs(1),
            max_validation_retries: None,
        }
    }
}

/// Enforces the call budget described above. Shared via `Arc` across a
/// shard's tick loop and any spawned LLM calls.
pub struct CostGuard {
    config: CostGuardConfig,
    limiter: DirectRateLimiter,
    session_calls: AtomicU32,
    error_count: AtomicU32,
    last_call: RwLock<Option<Instant>>,
    backoff_until: RwLock<Option<Instant>>,
}

impl CostGuard {
    pub fn new(config: CostGuardConfig) -> Self {
        let rpm = NonZeroU32::new(config.max_calls_per_minute.max(1)).unwrap();
        let limiter = RateLimiter::direct(Quota::per_minute(rpm));
        CostGuard {
            config,
            limiter,
            session_calls: AtomicU32::new(0),
            error_count: AtomicU32::new(0),
            last_call: RwLock::new(None),
            backoff_until: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &CostGuardConfig {
        &self.config
    }

    /// Returns `(ok, reason)`. `reason` is empty when `ok` is true.
    pub async fn can_call(&self) -> (bool, String) {
        if let Some(until) = *self.backoff_until.read().await {
            if DefaultClock::default().now() < until {
                return (false, "backoff active after recent errors".to_string());
            }
        }
        if self.session_calls.load(Ordering::SeqCst) >= self.config.max_calls_per_session {
            return (false, "session call quota exhausted".to_string());
        }
        if self.limiter.check().is_err() {
            return (false, "per-minute call rate exceeded".to_string());
        }
        (true, String::new())
    }

    pub async fn record_call(&self) {
        self.session_calls.fetch_add(1, Ordering::SeqCst);
        self.error_count.store(0, Ordering::SeqCst);
        *self.last_call.write().await = Some(Instant::now());
        *self.backoff_until.write().await = None;
    }

    pub async fn record_error(&self) {
        let errors = self.error_count.fetch_add(1, Ordering::SeqCst) + 1;
        let exponent = (errors.saturating_sub(1)).min(6);
        let backoff = (self.config.backoff_base * 2u32.pow(exponent)).min(Duration::from_secs(60));
        *self.backoff_until.write().await = Some(Instant::now() + backoff);
    }

    pub fn reset_session(&self) {
        self.session_calls.store(0, Ordering::SeqCst);
    }

    pub async fn is_idle(&self) -> bool {
        match *self.last_call.read().await {
            Some(last) => Instant::now().duration_since(last) > self.config.idle_timeout,
            None => false,
        }
    }

    pub fn max_validation_retries(&self) -> u32 {
        self.config.max_validation_retries.unwrap_or(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn can_call_succeeds_within_quota() {
        let guard = CostGuard::new(CostGuardConfig {
            max_calls_per_minute: 5,
            ..Default::default()
        });
        let (ok, _) = guard.can_call().await;
        assert!(ok);
    }

    #[tokio::test]
    async fn session_quota_blocks_further_calls() {
        let guard = CostGuard::new(CostGuardConfig {
            max_calls_per_session: 1,
            ..Default::default()
        });
        guard.record_call().await;
        let (ok, reason) = guard.can_call().await;
        assert!(!ok);
        assert!(reason.contains("session"));
    }

    #[tokio::test]
    async fn reset_session_clears_quota() {
        let guard = CostGuard::new(CostGuardConfig {
            max_calls_per_session: 1,
            ..Default::default()
        });
        guard.record_call().await;
        guard.reset_session();
        let (ok, _) = guard.can_call().await;
        assert!(ok);
    }

    #[tokio::test]
    async fn record_error_triggers_backoff() {
        let guard = CostGuard::new(CostGuardConfig::default());
        guard.record_error().await;
        let (ok, reason) = guard.can_call().await;
        assert!(!ok);
        assert!(reason.contains("backoff"));
    }

    #[tokio::test]
    async fn successful_call_resets_error_count() {
        let guard = CostGuard::new(CostGuardConfig::default());
        guard.record_error().await;
        guard.record_call().await;
        assert_eq!(guard.error_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn is_idle_false_before_first_call() {
        let guard = CostGuard::new(CostGuardConfig::default());
        assert!(!guard.is_idle().await);
    }

    #[tokio::test]
    async fn is_idle_true_after_timeout_elapses() {
        let guard = CostGuard::new(CostGuardConfig {
            idle_timeout: Duration::from_millis(1),
            ..Default::default()
        });
        guard.record_call().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(guard.is_idle().await);
    }

    #[test]
    fn backoff_formula_caps_at_sixty_seconds() {
        // errors=8 -> exponent min(7,6)=6 -> base*64, capped at 60s.
        let base = Duration::from_secs(1);
        let exponent: u32 = 6;
        let backoff = (base * 2u32.pow(exponent)).min(Duration::from_secs(60));
        assert_eq!(backoff, Duration::from_secs(60));
    }
}

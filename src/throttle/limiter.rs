//! Sliding-window rate limiter keyed by operation name.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::ThrottleConfig;
use super::window::TimeWindowCounter;

/// Admission policy for one operation key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatePolicy {
    /// Calls allowed within the period
    pub calls: u32,
    /// Length of the sliding window
    pub period: Duration,
    /// Reserved: looser steady-state bound for short bursts. The limiter
    /// enforces the strict steady-state rate; this field is not applied yet.
    pub burst: Option<u32>,
}

impl RatePolicy {
    /// A policy of `calls` per `period` with no burst allowance.
    pub const fn per(calls: u32, period: Duration) -> Self {
        Self {
            calls,
            period,
            burst: None,
        }
    }

    /// Built-in platform limits for well-known operation keys.
    ///
    /// Unknown keys fall back to 30 calls per second, the platform's
    /// general bot limit.
    pub fn builtin(key: &str) -> Self {
        match key {
            "broadcast" => Self::per(30, Duration::from_secs(1)),
            "bulk_message" => Self {
                burst: Some(50),
                ..Self::per(30, Duration::from_secs(1))
            },
            "api_call" => Self::per(30, Duration::from_secs(1)),
            "file_upload" => Self::per(10, Duration::from_secs(1)),
            _ => Self::per(30, Duration::from_secs(1)),
        }
    }
}

/// Sliding-window rate limiter shared by every outbound call site.
///
/// Per-key admission is serialized by a lazily-created async lock, so
/// concurrent callers of the same key see a single, monotonically-advancing
/// history. State is process-wide only; multiple OS processes each keep
/// independent limits.
pub struct RateLimiter {
    /// Per-key window state behind its per-key lock
    states: DashMap<String, Arc<tokio::sync::Mutex<TimeWindowCounter>>>,
    /// Configured policy overrides
    policies: HashMap<String, RatePolicy>,
    /// Capacity of each per-key history
    history_cap: usize,
}

impl RateLimiter {
    /// Create a rate limiter with built-in policies only.
    pub fn new() -> Self {
        Self::with_config(&ThrottleConfig::default())
    }

    /// Create a rate limiter from configuration.
    pub fn with_config(config: &ThrottleConfig) -> Self {
        let policies = config
            .policies
            .iter()
            .map(|(k, v)| (k.clone(), v.clone().into()))
            .collect();
        Self {
            states: DashMap::new(),
            policies,
            history_cap: config.history_cap,
        }
    }

    /// Resolve the effective policy for a key.
    fn policy_for(&self, key: &str, explicit: Option<RatePolicy>) -> RatePolicy {
        explicit
            .or_else(|| self.policies.get(key).copied())
            .unwrap_or_else(|| RatePolicy::builtin(key))
    }

    fn state_for(&self, key: &str) -> Arc<tokio::sync::Mutex<TimeWindowCounter>> {
        self.states
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(tokio::sync::Mutex::new(TimeWindowCounter::new(
                    self.history_cap,
                )))
            })
            .clone()
    }

    /// Check whether a call on `key` is admitted right now.
    ///
    /// Returns `(true, ZERO)` and records the call when admitted, or
    /// `(false, wait)` where `wait` is how long the caller must suspend
    /// before the window frees a slot.
    pub async fn check(&self, key: &str, policy: Option<RatePolicy>) -> (bool, Duration) {
        let policy = self.policy_for(key, policy);
        let state = self.state_for(key);
        let mut window = state.lock().await;

        let now = Instant::now();
        // The window is always pruned before it is counted.
        window.prune(now - policy.period);

        if window.len() >= policy.calls as usize {
            if let Some(oldest) = window.oldest() {
                let wait = policy.period.saturating_sub(now - oldest);
                if !wait.is_zero() {
                    trace!(key = %key, wait_ms = wait.as_millis() as u64, "over limit");
                    return (false, wait);
                }
            }
        }

        window.record(now);
        (true, Duration::ZERO)
    }

    /// Suspend until a call on `key` is admitted.
    ///
    /// Loops on [`check`](Self::check), sleeping exactly the reported wait on
    /// each denial; it never busy-polls.
    pub async fn wait_if_needed(&self, key: &str, policy: Option<RatePolicy>) {
        loop {
            let (allowed, wait) = self.check(key, policy).await;
            if allowed {
                break;
            }
            debug!(key = %key, wait_ms = wait.as_millis() as u64, "rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Number of keys with live window state.
    pub fn key_count(&self) -> usize {
        self.states.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

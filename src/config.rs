//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::throttle::RatePolicy;

/// Main configuration for the Turnstile core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Membership cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub throttle: ThrottleConfig,

    /// Delivery queue configuration
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Resolve the user's language before gating, so prompts are localized
    #[serde(default = "default_language_onboarding")]
    pub language_onboarding: bool,

    /// Fallback language for prompts
    #[serde(default = "default_lang")]
    pub default_lang: String,
}

impl Default for TurnstileConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            throttle: ThrottleConfig::default(),
            delivery: DeliveryConfig::default(),
            language_onboarding: default_language_onboarding(),
            default_lang: default_lang(),
        }
    }
}

fn default_language_onboarding() -> bool {
    true
}

fn default_lang() -> String {
    "en".to_string()
}

/// Membership cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached users
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    /// How long a positive membership result stays fresh, in seconds
    #[serde(default = "default_member_ttl")]
    pub member_ttl_secs: u64,

    /// How long a negative membership result stays fresh, in seconds
    #[serde(default = "default_non_member_ttl")]
    pub non_member_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            member_ttl_secs: default_member_ttl(),
            non_member_ttl_secs: default_non_member_ttl(),
        }
    }
}

fn default_cache_capacity() -> usize {
    10_000
}

fn default_member_ttl() -> u64 {
    30 * 60
}

fn default_non_member_ttl() -> u64 {
    2 * 60
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Maximum timestamps retained per operation key
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,

    /// Per-operation policies, overriding the built-in platform limits
    #[serde(default)]
    pub policies: HashMap<String, RatePolicyConfig>,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            history_cap: default_history_cap(),
            policies: HashMap::new(),
        }
    }
}

fn default_history_cap() -> usize {
    1000
}

/// Serializable form of a rate limit policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatePolicyConfig {
    /// Calls allowed within the period
    pub calls: u32,
    /// Period length in seconds
    pub period_secs: u64,
    /// Reserved: looser steady-state bound for short bursts
    #[serde(default)]
    pub burst: Option<u32>,
}

impl From<RatePolicyConfig> for RatePolicy {
    fn from(c: RatePolicyConfig) -> Self {
        RatePolicy {
            calls: c.calls,
            period: std::time::Duration::from_secs(c.period_secs),
            burst: c.burst,
        }
    }
}

/// Delivery queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Retry budget for transient send failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// How long `stop()` waits for the queue to drain, in seconds
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,

    /// Queue-pop timeout while running, in seconds
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            drain_timeout_secs: default_drain_timeout(),
            poll_timeout_secs: default_poll_timeout(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_drain_timeout() -> u64 {
    30
}

fn default_poll_timeout() -> u64 {
    1
}

impl TurnstileConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> crate::error::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: TurnstileConfig = serde_yaml::from_str(&contents)
            .map_err(|e| crate::error::TurnstileError::Config(e.to_string()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TurnstileConfig::default();
        assert_eq!(config.cache.capacity, 10_000);
        assert_eq!(config.cache.member_ttl_secs, 1800);
        assert_eq!(config.cache.non_member_ttl_secs, 120);
        assert_eq!(config.delivery.max_retries, 3);
        assert!(config.language_onboarding);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
cache:
  capacity: 500
  non_member_ttl_secs: 60
throttle:
  policies:
    broadcast:
      calls: 25
      period_secs: 1
delivery:
  drain_timeout_secs: 10
language_onboarding: false
"#;
        let config: TurnstileConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.cache.capacity, 500);
        assert_eq!(config.cache.member_ttl_secs, 1800); // default survives
        assert_eq!(config.cache.non_member_ttl_secs, 60);
        assert_eq!(config.throttle.policies["broadcast"].calls, 25);
        assert_eq!(config.delivery.drain_timeout_secs, 10);
        assert!(!config.language_onboarding);
    }

    #[test]
    fn test_policy_conversion() {
        let policy: RatePolicy = RatePolicyConfig {
            calls: 30,
            period_secs: 1,
            burst: Some(50),
        }
        .into();
        assert_eq!(policy.calls, 30);
        assert_eq!(policy.period, std::time::Duration::from_secs(1));
        assert_eq!(policy.burst, Some(50));
    }
}

//! Turnstile - Membership gating and outbound throttling for chat bots
//!
//! This crate implements the access-control core of a bot that requires its
//! users to belong to a set of channels: a bounded, TTL-tiered membership
//! cache with a concurrent verifier and a gating interceptor, plus a
//! sliding-window rate limiter and a retrying delivery queue that keep
//! outbound sends under the platform's abuse limits.
//!
//! It is a pure in-process control layer: the host application supplies the
//! messaging client, channel registry, and locale resolver through the
//! traits in [`api`], and owns one set of these components per process.
//! State is single-process by design; running multiple workers gives each an
//! independent cache and rate-limit state.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use turnstile::config::TurnstileConfig;
//! # use turnstile::membership::{MembershipCache, MembershipGate};
//! # use turnstile::throttle::{DeliveryQueue, RateLimiter};
//! # fn wire(
//! #     client: Arc<dyn turnstile::api::MembershipClient>,
//! #     registry: Arc<dyn turnstile::api::ChannelRegistry>,
//! #     locale: Arc<dyn turnstile::api::LocaleResolver>,
//! # ) {
//! let config = TurnstileConfig::default();
//! let cache = Arc::new(MembershipCache::new(&config.cache));
//! let limiter = Arc::new(RateLimiter::with_config(&config.throttle));
//! let queue = DeliveryQueue::with_config(limiter.clone(), config.delivery.clone());
//! let gate = MembershipGate::new(client, registry, locale, cache, limiter, &config);
//! # let _ = (queue, gate);
//! # }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod membership;
pub mod throttle;

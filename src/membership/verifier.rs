//! Concurrent, fail-classified verification of required-channel membership.

use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::api::{ApiError, ChannelRegistry, MembershipClient, RequiredChannel};
use crate::error::{Result, TurnstileError};
use super::cache::MembershipCache;

/// Outcome of a membership verification.
///
/// A closed type callers pattern-match on; transient backend trouble is a
/// variant rather than an exception, so it can never be mistaken for a real
/// negative.
#[derive(Debug)]
pub enum Verification {
    /// The user belongs to every required channel.
    Member,
    /// The user is missing from the listed channels.
    NotMember(Vec<RequiredChannel>),
    /// At least one check hit a connectivity failure; the aggregate is
    /// indeterminate and nothing was cached. The caller should offer a
    /// retry affordance instead of a definite answer.
    Transient(ApiError),
}

/// Verifies a user against the full required-channel set in parallel.
///
/// The channel list is read fresh from the registry on every call, never
/// cached, so admin changes take effect immediately. Only the aggregate
/// boolean is written back to the membership cache.
pub struct ChannelVerifier {
    client: Arc<dyn MembershipClient>,
    registry: Arc<dyn ChannelRegistry>,
    cache: Arc<MembershipCache>,
}

impl ChannelVerifier {
    /// Create a verifier over the given collaborators and cache.
    pub fn new(
        client: Arc<dyn MembershipClient>,
        registry: Arc<dyn ChannelRegistry>,
        cache: Arc<MembershipCache>,
    ) -> Self {
        Self {
            client,
            registry,
            cache,
        }
    }

    /// Check one channel, classifying the outcome.
    ///
    /// `Ok(true)` means joined, `Ok(false)` means an authoritative negative
    /// (explicit non-member status, or an API rejection such as the bot
    /// lacking access — fail-closed). A connectivity failure propagates so
    /// the whole verification is marked indeterminate.
    async fn check_single(
        &self,
        user_id: i64,
        channel: &RequiredChannel,
    ) -> std::result::Result<bool, ApiError> {
        let chat = channel.chat_ref();
        match self.client.get_chat_member(&chat, user_id).await {
            Ok(status) => {
                debug!(user_id, channel = %chat, ?status, "membership status");
                Ok(status.is_joined())
            }
            Err(e) if e.is_transient() => Err(e),
            Err(e) => {
                warn!(user_id, channel = %chat, error = %e, "membership check rejected, treating as not joined");
                Ok(false)
            }
        }
    }

    /// Verify the user against every active required channel.
    ///
    /// Checks are dispatched concurrently, so worst-case latency is bounded
    /// by the slowest single channel rather than the sum.
    ///
    /// Errors only when the channel registry itself is unreachable.
    pub async fn verify(&self, user_id: i64) -> Result<Verification> {
        self.cache.maybe_sweep();

        let channels: Vec<RequiredChannel> = self
            .registry
            .required_channels()
            .await
            .map_err(|e| TurnstileError::Unavailable(e.to_string()))?
            .into_iter()
            .filter(|c| c.active)
            .collect();

        if channels.is_empty() {
            self.cache.put(user_id, true);
            return Ok(Verification::Member);
        }

        let checks = channels
            .iter()
            .map(|channel| self.check_single(user_id, channel));
        let results = join_all(checks).await;

        let mut not_joined = Vec::new();
        let mut transient: Option<ApiError> = None;
        for (result, channel) in results.into_iter().zip(&channels) {
            match result {
                Ok(true) => {}
                Ok(false) => not_joined.push(channel.clone()),
                Err(e) => {
                    warn!(user_id, channel = %channel.chat_ref(), error = %e, "transient failure during membership check");
                    transient.get_or_insert(e);
                }
            }
        }

        // A definite answer cannot be produced while any check is
        // indeterminate; leave the cache untouched.
        if let Some(e) = transient {
            return Ok(Verification::Transient(e));
        }

        let is_member = not_joined.is_empty();
        self.cache.put(user_id, is_member);
        debug!(user_id, is_member, missing = not_joined.len(), "membership verified");

        if is_member {
            Ok(Verification::Member)
        } else {
            Ok(Verification::NotMember(not_joined))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ChatRef, MemberStatus, RegistryError};
    use crate::config::CacheConfig;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::time::Instant;

    struct FakeClient {
        statuses: HashMap<String, std::result::Result<MemberStatus, ApiError>>,
        delay: Duration,
    }

    #[async_trait]
    impl MembershipClient for FakeClient {
        async fn get_chat_member(
            &self,
            chat: &ChatRef,
            _user_id: i64,
        ) -> std::result::Result<MemberStatus, ApiError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.statuses
                .get(&chat.to_string())
                .cloned()
                .unwrap_or(Err(ApiError::NotFound))
        }
    }

    struct FakeRegistry {
        channels: std::result::Result<Vec<RequiredChannel>, String>,
    }

    #[async_trait]
    impl ChannelRegistry for FakeRegistry {
        async fn required_channels(
            &self,
        ) -> std::result::Result<Vec<RequiredChannel>, RegistryError> {
            self.channels.clone().map_err(RegistryError)
        }
    }

    fn channel(id: &str, title: &str) -> RequiredChannel {
        RequiredChannel {
            channel_id: id.to_string(),
            title: title.to_string(),
            url: format!("https://t.me/{}", title),
            active: true,
        }
    }

    fn verifier(
        statuses: HashMap<String, std::result::Result<MemberStatus, ApiError>>,
        delay: Duration,
        channels: Vec<RequiredChannel>,
    ) -> (ChannelVerifier, Arc<MembershipCache>) {
        let cache = Arc::new(MembershipCache::new(&CacheConfig::default()));
        let verifier = ChannelVerifier::new(
            Arc::new(FakeClient { statuses, delay }),
            Arc::new(FakeRegistry {
                channels: Ok(channels),
            }),
            cache.clone(),
        );
        (verifier, cache)
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_channel_list_is_trivially_member() {
        let (verifier, cache) = verifier(HashMap::new(), Duration::ZERO, vec![]);

        let result = verifier.verify(42).await.unwrap();
        assert!(matches!(result, Verification::Member));
        assert_eq!(cache.get(42), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_member_of_all_channels() {
        let statuses = HashMap::from([
            ("@a".to_string(), Ok(MemberStatus::Member)),
            ("@b".to_string(), Ok(MemberStatus::Administrator)),
            ("-100123".to_string(), Ok(MemberStatus::Owner)),
        ]);
        let channels = vec![channel("@a", "a"), channel("@b", "b"), channel("-100123", "c")];
        let (verifier, cache) = verifier(statuses, Duration::ZERO, channels);

        let result = verifier.verify(42).await.unwrap();
        assert!(matches!(result, Verification::Member));
        assert_eq!(cache.get(42), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_channels_reported() {
        let statuses = HashMap::from([
            ("@a".to_string(), Ok(MemberStatus::Member)),
            ("@b".to_string(), Ok(MemberStatus::Left)),
        ]);
        let channels = vec![channel("@a", "a"), channel("@b", "b")];
        let (verifier, cache) = verifier(statuses, Duration::ZERO, channels);

        match verifier.verify(42).await.unwrap() {
            Verification::NotMember(missing) => {
                assert_eq!(missing.len(), 1);
                assert_eq!(missing[0].channel_id, "@b");
            }
            other => panic!("expected NotMember, got {:?}", other),
        }
        assert_eq!(cache.get(42), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_authoritative_error_fails_closed() {
        let statuses = HashMap::from([
            ("@a".to_string(), Ok(MemberStatus::Member)),
            ("@b".to_string(), Err(ApiError::Unauthorized)),
        ]);
        let channels = vec![channel("@a", "a"), channel("@b", "b")];
        let (verifier, cache) = verifier(statuses, Duration::ZERO, channels);

        match verifier.verify(42).await.unwrap() {
            Verification::NotMember(missing) => {
                assert_eq!(missing[0].channel_id, "@b");
            }
            other => panic!("expected NotMember, got {:?}", other),
        }
        assert_eq!(cache.get(42), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_indeterminate() {
        let statuses = HashMap::from([
            ("@a".to_string(), Ok(MemberStatus::Member)),
            (
                "@b".to_string(),
                Err(ApiError::Network {
                    reason: "connect timeout".to_string(),
                }),
            ),
        ]);
        let channels = vec![channel("@a", "a"), channel("@b", "b")];
        let (verifier, cache) = verifier(statuses, Duration::ZERO, channels);

        let result = verifier.verify(42).await.unwrap();
        assert!(matches!(result, Verification::Transient(_)));
        // An indeterminate check never writes to the cache.
        assert_eq!(cache.get(42), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactive_channels_are_skipped() {
        let statuses = HashMap::from([("@a".to_string(), Ok(MemberStatus::Member))]);
        let mut inactive = channel("@b", "b");
        inactive.active = false;
        let channels = vec![channel("@a", "a"), inactive];
        let (verifier, _cache) = verifier(statuses, Duration::ZERO, channels);

        let result = verifier.verify(42).await.unwrap();
        assert!(matches!(result, Verification::Member));
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_failure_propagates() {
        let cache = Arc::new(MembershipCache::new(&CacheConfig::default()));
        let verifier = ChannelVerifier::new(
            Arc::new(FakeClient {
                statuses: HashMap::new(),
                delay: Duration::ZERO,
            }),
            Arc::new(FakeRegistry {
                channels: Err("storage down".to_string()),
            }),
            cache,
        );

        let err = verifier.verify(42).await.unwrap_err();
        assert!(matches!(err, TurnstileError::Unavailable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_checks_run_in_parallel() {
        let statuses: HashMap<_, _> = (0..5)
            .map(|i| (format!("@ch{}", i), Ok(MemberStatus::Member)))
            .collect();
        let channels: Vec<_> = (0..5)
            .map(|i| channel(&format!("@ch{}", i), &format!("ch{}", i)))
            .collect();
        let (verifier, _cache) = verifier(statuses, Duration::from_millis(100), channels);

        let start = Instant::now();
        let result = verifier.verify(42).await.unwrap();
        assert!(matches!(result, Verification::Member));

        // Five 100ms checks complete in one round trip, not five.
        assert_eq!(start.elapsed(), Duration::from_millis(100));
    }
}

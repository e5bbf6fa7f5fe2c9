//! Bounded, TTL-tiered membership cache.

use lru::LruCache;
use parking_lot::Mutex;
use rand::Rng;
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::CacheConfig;

/// Probability that any one lookup triggers a proactive sweep of expired
/// entries. Keeps memory bounded without a background timer.
const SWEEP_PROBABILITY: f64 = 0.1;

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    is_member: bool,
    checked_at: Instant,
}

/// LRU map of user id to last verified membership result.
///
/// Positive results stay fresh far longer than negative ones: membership
/// rarely lapses, so a cached `true` saves API calls for half an hour, while
/// a non-member is expected to join and retry within minutes, so a cached
/// `false` expires after two. The capacity bound plus least-recently-used
/// eviction keeps a long-lived process safe against unbounded growth from
/// transient user ids.
pub struct MembershipCache {
    entries: Mutex<LruCache<i64, CacheEntry>>,
    member_ttl: Duration,
    non_member_ttl: Duration,
}

impl MembershipCache {
    /// Create a cache from configuration.
    pub fn new(config: &CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            member_ttl: Duration::from_secs(config.member_ttl_secs),
            non_member_ttl: Duration::from_secs(config.non_member_ttl_secs),
        }
    }

    fn ttl_for(&self, is_member: bool) -> Duration {
        if is_member {
            self.member_ttl
        } else {
            self.non_member_ttl
        }
    }

    /// Look up a user's cached membership result.
    ///
    /// Returns `None` when absent or expired; a hit counts as a touch and
    /// moves the entry to most-recently-used.
    pub fn get(&self, user_id: i64) -> Option<bool> {
        let mut entries = self.entries.lock();

        let entry = *entries.peek(&user_id)?;
        if Instant::now().duration_since(entry.checked_at) >= self.ttl_for(entry.is_member) {
            entries.pop(&user_id);
            return None;
        }

        // Promote to most-recently-used.
        entries.get(&user_id);
        Some(entry.is_member)
    }

    /// Store a fresh verification result, overwriting any previous entry.
    ///
    /// When the cache is full the least-recently-touched entry is evicted
    /// before the insert, so the bound is never exceeded.
    pub fn put(&self, user_id: i64, is_member: bool) {
        let mut entries = self.entries.lock();
        let evicted = entries.push(
            user_id,
            CacheEntry {
                is_member,
                checked_at: Instant::now(),
            },
        );
        if let Some((old, _)) = evicted {
            if old != user_id {
                debug!(evicted_user = old, "cache full, evicted least-recently-used entry");
            }
        }
    }

    /// Drop one user's entry, used right after they claim to have joined.
    pub fn invalidate(&self, user_id: i64) {
        if self.entries.lock().pop(&user_id).is_some() {
            debug!(user_id, "membership cache entry invalidated");
        }
    }

    /// Drop every entry.
    ///
    /// Called whenever the required-channel set changes, because the meaning
    /// of "member" changed for every user at once. Returns the number of
    /// entries dropped.
    pub fn invalidate_all(&self) -> usize {
        let mut entries = self.entries.lock();
        let count = entries.len();
        entries.clear();
        info!(count, "membership cache cleared");
        count
    }

    /// Drop all expired entries, returning how many were removed.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.lock();
        let now = Instant::now();

        let expired: Vec<i64> = entries
            .iter()
            .filter(|(_, e)| now.duration_since(e.checked_at) >= self.ttl_for(e.is_member))
            .map(|(&user_id, _)| user_id)
            .collect();

        for user_id in &expired {
            entries.pop(user_id);
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "swept expired membership cache entries");
        }
        expired.len()
    }

    /// Occasionally run [`sweep`](Self::sweep), roughly once per ten calls.
    pub fn maybe_sweep(&self) {
        if rand::thread_rng().gen_bool(SWEEP_PROBABILITY) {
            self.sweep();
        }
    }

    /// Number of live entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_with_capacity(capacity: usize) -> MembershipCache {
        MembershipCache::new(&CacheConfig {
            capacity,
            ..CacheConfig::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_member_result_fresh_for_thirty_minutes() {
        let cache = cache_with_capacity(10);
        cache.put(1, true);

        tokio::time::advance(Duration::from_secs(29 * 60)).await;
        assert_eq!(cache.get(1), Some(true));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(cache.get(1), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_member_result_fresh_for_two_minutes() {
        let cache = cache_with_capacity(10);
        cache.put(1, false);

        tokio::time::advance(Duration::from_secs(119)).await;
        assert_eq!(cache.get(1), Some(false));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get(1), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_bound_evicts_first_inserted() {
        let cache = cache_with_capacity(5);
        for user in 0..6 {
            cache.put(user, true);
        }

        assert_eq!(cache.len(), 5);
        assert_eq!(cache.get(0), None);
        assert_eq!(cache.get(5), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_touched_entry_survives_eviction() {
        let cache = cache_with_capacity(2);
        cache.put(1, true);
        cache.put(2, true);
        assert_eq!(cache.get(1), Some(true)); // touch 1, making 2 the LRU
        cache.put(3, true);

        assert_eq!(cache.get(2), None);
        assert_eq!(cache.get(1), Some(true));
        assert_eq!(cache.get(3), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_refreshes_entry() {
        let cache = cache_with_capacity(10);
        cache.put(1, false);
        tokio::time::advance(Duration::from_secs(100)).await;
        cache.put(1, true);
        tokio::time::advance(Duration::from_secs(120)).await;

        // The old 2-minute TTL no longer applies after the overwrite.
        assert_eq!(cache.get(1), Some(true));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_single_user() {
        let cache = cache_with_capacity(10);
        cache.put(1, false);
        cache.put(2, true);
        cache.invalidate(1);

        assert_eq!(cache.get(1), None);
        assert_eq!(cache.get(2), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_all() {
        let cache = cache_with_capacity(10);
        for user in 0..4 {
            cache.put(user, user % 2 == 0);
        }

        assert_eq!(cache.invalidate_all(), 4);
        assert!(cache.is_empty());
        for user in 0..4 {
            assert_eq!(cache.get(user), None);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_drops_only_expired() {
        let cache = cache_with_capacity(10);
        cache.put(1, false); // expires after 2 minutes
        cache.put(2, true); // expires after 30 minutes

        tokio::time::advance(Duration::from_secs(3 * 60)).await;
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(2), Some(true));
    }
}

//! In-memory rate limit store
//!
//! Single-process only. Counters live in [`DashMap`]s: the entry API holds
//! the shard lock for the key while a counter is read and updated, which
//! makes `try_consume` atomic per (bucket, identity).

use std::sync::Arc;

use dashmap::DashMap;

use super::clock::{Clock, SystemClock};
use super::{RateLimitConfig, RateLimitError, RateLimitResult, RateLimitStore};
use crate::client::Identity;

/// Buckets above this many entries are swept on the next access
pub const DEFAULT_GC_THRESHOLD: usize = 10_000;

/// Per (bucket, identity) counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitEntry {
    pub count: u32,
    pub reset_at_ms: i64,
    pub first_request_at_ms: i64,
}

impl RateLimitEntry {
    fn open(now_ms: i64, window_ms: i64) -> Self {
        Self {
            count: 0,
            reset_at_ms: now_ms + window_ms,
            first_request_at_ms: now_ms,
        }
    }

    fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.reset_at_ms
    }
}

/// Buckets are distinct per (name, window, max); configs that differ in any
/// of the three never share counters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    name: String,
    window_ms: i64,
    max_requests: u32,
}

impl From<&RateLimitConfig> for BucketKey {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            name: config.name.to_string(),
            window_ms: config.window_ms(),
            max_requests: config.max_requests,
        }
    }
}

#[derive(Debug, Default)]
struct Bucket {
    entries: DashMap<String, RateLimitEntry>,
}

/// Process-local fixed-window limiter.
///
/// Constructed explicitly and shared through `Arc`; there is no global
/// instance. Call [`InMemoryRateLimiter::shutdown`] when the server stops.
pub struct InMemoryRateLimiter {
    buckets: DashMap<BucketKey, Arc<Bucket>>,
    clock: Arc<dyn Clock>,
    gc_threshold: usize,
}

impl Default for InMemoryRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRateLimiter {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: DashMap::new(),
            clock,
            gc_threshold: DEFAULT_GC_THRESHOLD,
        }
    }

    pub fn with_gc_threshold(mut self, gc_threshold: usize) -> Self {
        self.gc_threshold = gc_threshold;
        self
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of live buckets
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Number of entries held for `config`'s bucket
    pub fn entry_count(&self, config: &RateLimitConfig) -> usize {
        self.buckets
            .get(&BucketKey::from(config))
            .map(|bucket| bucket.entries.len())
            .unwrap_or(0)
    }

    /// Drop all counters and log what was held
    pub fn shutdown(&self) {
        let entries: usize = self
            .buckets
            .iter()
            .map(|bucket| bucket.value().entries.len())
            .sum();
        tracing::info!(
            buckets = self.buckets.len(),
            entries = entries,
            "Rate limiter shut down"
        );
        self.buckets.clear();
    }

    fn bucket(&self, config: &RateLimitConfig) -> Arc<Bucket> {
        self.buckets
            .entry(BucketKey::from(config))
            .or_default()
            .value()
            .clone()
    }

    fn snapshot(
        config: &RateLimitConfig,
        entry: &RateLimitEntry,
        allowed: bool,
        now_ms: i64,
    ) -> RateLimitResult {
        RateLimitResult {
            allowed,
            count: entry.count,
            limit: config.max_requests,
            remaining: config.max_requests.saturating_sub(entry.count),
            reset_at_ms: entry.reset_at_ms,
            checked_at_ms: now_ms,
        }
    }

    /// Runs `update` on the live entry for `identity` while holding its lock.
    fn with_live_entry<T>(
        &self,
        config: &RateLimitConfig,
        identity: &Identity,
        update: impl FnOnce(&mut RateLimitEntry, i64) -> T,
    ) -> T {
        let bucket = self.bucket(config);
        let now_ms = self.clock.now_ms();
        let window_ms = config.window_ms();

        let output = {
            let mut entry = bucket
                .entries
                .entry(identity.storage_key())
                .or_insert_with(|| RateLimitEntry::open(now_ms, window_ms));
            if entry.is_expired(now_ms) {
                *entry = RateLimitEntry::open(now_ms, window_ms);
            }
            update(&mut *entry, now_ms)
        };

        // The entry guard must be released before sweeping the same map.
        self.collect_garbage(&bucket, config, now_ms);
        output
    }

    fn collect_garbage(&self, bucket: &Bucket, config: &RateLimitConfig, now_ms: i64) {
        if bucket.entries.len() <= self.gc_threshold {
            return;
        }
        let horizon_ms = 2 * config.window_ms();
        let before = bucket.entries.len();
        bucket
            .entries
            .retain(|_, entry| now_ms - entry.reset_at_ms <= horizon_ms);
        tracing::debug!(
            bucket = %config.name,
            removed = before.saturating_sub(bucket.entries.len()),
            "Rate limit entries collected"
        );
    }

    pub fn check_now(&self, config: &RateLimitConfig, identity: &Identity) -> RateLimitResult {
        self.with_live_entry(config, identity, |entry, now_ms| {
            Self::snapshot(config, entry, entry.count < config.max_requests, now_ms)
        })
    }

    pub fn increment_now(&self, config: &RateLimitConfig, identity: &Identity) {
        self.with_live_entry(config, identity, |entry, _| {
            entry.count = entry.count.saturating_add(1);
        });
    }

    pub fn try_consume_now(&self, config: &RateLimitConfig, identity: &Identity) -> RateLimitResult {
        let result = self.with_live_entry(config, identity, |entry, now_ms| {
            let allowed = entry.count < config.max_requests;
            if allowed {
                entry.count += 1;
            }
            Self::snapshot(config, entry, allowed, now_ms)
        });

        if !result.allowed {
            tracing::warn!(
                bucket = %config.name,
                identity = %identity,
                count = result.count,
                max = config.max_requests,
                "Rate limit exceeded"
            );
        }
        result
    }

    pub fn status_now(&self, config: &RateLimitConfig, identity: &Identity) -> RateLimitResult {
        let now_ms = self.clock.now_ms();
        let bucket = self.buckets.get(&BucketKey::from(config)).map(|b| b.value().clone());
        let live = bucket
            .as_ref()
            .and_then(|bucket| bucket.entries.get(&identity.storage_key()).map(|e| *e.value()))
            .filter(|entry| !entry.is_expired(now_ms));

        let entry = live.unwrap_or_else(|| RateLimitEntry::open(now_ms, config.window_ms()));
        Self::snapshot(config, &entry, entry.count < config.max_requests, now_ms)
    }
}

impl RateLimitStore for InMemoryRateLimiter {
    async fn check(
        &self,
        config: &RateLimitConfig,
        identity: &Identity,
    ) -> Result<RateLimitResult, RateLimitError> {
        Ok(self.check_now(config, identity))
    }

    async fn increment(
        &self,
        config: &RateLimitConfig,
        identity: &Identity,
    ) -> Result<(), RateLimitError> {
        self.increment_now(config, identity);
        Ok(())
    }

    async fn try_consume(
        &self,
        config: &RateLimitConfig,
        identity: &Identity,
    ) -> Result<RateLimitResult, RateLimitError> {
        Ok(self.try_consume_now(config, identity))
    }

    async fn status(
        &self,
        config: &RateLimitConfig,
        identity: &Identity,
    ) -> Result<RateLimitResult, RateLimitError> {
        Ok(self.status_now(config, identity))
    }

    async fn reset(&self) -> Result<(), RateLimitError> {
        self.buckets.clear();
        tracing::info!("Rate limiter reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::{ManualClock, RateLimitPreset};

    fn limiter_at(start_ms: i64) -> (InMemoryRateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start_ms));
        (InMemoryRateLimiter::with_clock(clock.clone()), clock)
    }

    fn ip(addr: &str) -> Identity {
        Identity::ip(addr)
    }

    #[tokio::test]
    async fn test_blocks_after_max_increments_and_resets_after_window() {
        let (limiter, clock) = limiter_at(1_000);
        let config = RateLimitConfig::new("test", 3, 60);
        let who = ip("10.0.0.1");

        for _ in 0..3 {
            limiter.increment(&config, &who).await.unwrap();
        }

        let blocked = limiter.check(&config, &who).await.unwrap();
        assert!(!blocked.allowed);
        assert_eq!(blocked.remaining, 0);
        assert_eq!(blocked.count, 3);

        clock.set_ms(blocked.reset_at_ms);
        let fresh = limiter.check(&config, &who).await.unwrap();
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 3);
        assert_eq!(fresh.count, 0);
    }

    #[tokio::test]
    async fn test_check_is_idempotent() {
        let limiter = InMemoryRateLimiter::new();
        let config = RateLimitPreset::AiQuery.config();
        let who = ip("10.0.0.2");

        let first = limiter.check(&config, &who).await.unwrap();
        let second = limiter.check(&config, &who).await.unwrap();
        assert_eq!(first.remaining, second.remaining);
        assert_eq!(first.reset_at_ms, second.reset_at_ms);
        assert_eq!(first.remaining, config.max_requests);
    }

    #[tokio::test]
    async fn test_increment_keeps_window_until_reset() {
        let (limiter, clock) = limiter_at(0);
        let config = RateLimitConfig::new("test", 5, 60);
        let who = ip("10.0.0.3");

        limiter.increment(&config, &who).await.unwrap();
        clock.advance_ms(30_000);
        limiter.increment(&config, &who).await.unwrap();

        let result = limiter.check(&config, &who).await.unwrap();
        assert_eq!(result.count, 2);
        assert_eq!(result.reset_at_ms, 60_000);
    }

    #[tokio::test]
    async fn test_expired_entry_is_replaced_not_incremented() {
        let (limiter, clock) = limiter_at(0);
        let config = RateLimitConfig::new("test", 5, 60);
        let who = ip("10.0.0.4");

        for _ in 0..4 {
            limiter.increment(&config, &who).await.unwrap();
        }
        clock.advance_ms(61_000);
        limiter.increment(&config, &who).await.unwrap();

        let result = limiter.check(&config, &who).await.unwrap();
        assert_eq!(result.count, 1);
        assert_eq!(result.reset_at_ms, 121_000);
    }

    #[tokio::test]
    async fn test_fixed_window_allows_burst_across_boundary() {
        let (limiter, clock) = limiter_at(0);
        let config = RateLimitConfig::new("burst", 2, 60);
        let who = ip("10.0.0.5");

        clock.set_ms(59_999);
        assert!(limiter.try_consume(&config, &who).await.unwrap().allowed);
        assert!(limiter.try_consume(&config, &who).await.unwrap().allowed);
        assert!(!limiter.try_consume(&config, &who).await.unwrap().allowed);

        // window opened at 59_999, so it resets at 119_999
        clock.set_ms(119_999);
        assert!(limiter.try_consume(&config, &who).await.unwrap().allowed);
        assert!(limiter.try_consume(&config, &who).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_try_consume_denied_does_not_count() {
        let (limiter, _clock) = limiter_at(0);
        let config = RateLimitConfig::new("test", 1, 60);
        let who = ip("10.0.0.6");

        let first = limiter.try_consume(&config, &who).await.unwrap();
        assert!(first.allowed);
        assert_eq!(first.remaining, 0);

        let second = limiter.try_consume(&config, &who).await.unwrap();
        assert!(!second.allowed);
        assert_eq!(second.count, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_try_consume_is_atomic_under_contention() {
        let limiter = Arc::new(InMemoryRateLimiter::new());
        let config = RateLimitConfig::new("contended", 10, 60);
        let who = ip("10.0.0.7");

        let mut handles = Vec::new();
        for _ in 0..64 {
            let limiter = limiter.clone();
            let config = config.clone();
            let who = who.clone();
            handles.push(tokio::spawn(async move {
                limiter.try_consume(&config, &who).await.unwrap().allowed
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
    }

    #[tokio::test]
    async fn test_user_and_ip_identities_never_collide() {
        let (limiter, _clock) = limiter_at(0);
        let config = RateLimitConfig::new("test", 1, 60);

        assert!(limiter.try_consume(&config, &Identity::user("abc")).await.unwrap().allowed);
        assert!(limiter.try_consume(&config, &Identity::ip("abc")).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_buckets_are_separate_per_config() {
        let (limiter, _clock) = limiter_at(0);
        let who = ip("10.0.0.8");
        let tight = RateLimitConfig::new("ai-query", 1, 60);
        let loose = RateLimitConfig::new("ai-query", 5, 60);

        assert!(limiter.try_consume(&tight, &who).await.unwrap().allowed);
        assert!(!limiter.try_consume(&tight, &who).await.unwrap().allowed);
        assert!(limiter.try_consume(&loose, &who).await.unwrap().allowed);
        assert_eq!(limiter.bucket_count(), 2);
    }

    #[tokio::test]
    async fn test_status_never_creates_entries() {
        let (limiter, _clock) = limiter_at(5_000);
        let config = RateLimitConfig::new("test", 4, 60);
        let who = ip("10.0.0.9");

        let status = limiter.status(&config, &who).await.unwrap();
        assert_eq!(status.count, 0);
        assert_eq!(status.remaining, 4);
        assert_eq!(limiter.entry_count(&config), 0);

        limiter.increment(&config, &who).await.unwrap();
        let status = limiter.status(&config, &who).await.unwrap();
        assert_eq!(status.count, 1);
        assert_eq!(status.remaining, 3);
        assert_eq!(status.reset_at_ms, 65_000);
    }

    #[tokio::test]
    async fn test_garbage_collection_drops_stale_entries() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = InMemoryRateLimiter::with_clock(clock.clone()).with_gc_threshold(2);
        let config = RateLimitConfig::new("gc", 5, 1);

        limiter.increment(&config, &ip("1.1.1.1")).await.unwrap();
        limiter.increment(&config, &ip("1.1.1.2")).await.unwrap();

        // both reset at 1_000; more than two windows later they are stale
        clock.set_ms(3_500);
        limiter.increment(&config, &ip("1.1.1.3")).await.unwrap();

        assert_eq!(limiter.entry_count(&config), 1);
    }

    #[tokio::test]
    async fn test_reset_and_shutdown_clear_everything() {
        let limiter = InMemoryRateLimiter::new();
        let config = RateLimitConfig::new("test", 1, 60);
        let who = ip("10.0.0.10");

        limiter.increment(&config, &who).await.unwrap();
        limiter.reset().await.unwrap();
        assert_eq!(limiter.bucket_count(), 0);
        assert!(limiter.check(&config, &who).await.unwrap().allowed);

        limiter.shutdown();
        assert_eq!(limiter.bucket_count(), 0);
    }
}

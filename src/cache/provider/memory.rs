//! In-process LRU provider bounded by total bytes.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use metrics::counter;
use tracing::{debug, warn};

use super::{CacheProvider, CachedValue, Ttl, parse_counter};
use crate::cache::error::CacheError;

const BYTES_PER_MIB: usize = 1024 * 1024;

pub(crate) const METRIC_MEMORY_EVICT_TOTAL: &str = "mintcache_memory_evict_total";

struct Entry {
    data: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(data: Vec<u8>, ttl: Ttl, now: Instant) -> Self {
        // A lifetime past the end of `Instant` is kept forever.
        let expires_at = ttl
            .remaining()
            .and_then(|ttl| now.checked_add(round_up_to_secs(ttl)));
        Self { data, expires_at }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn ttl(&self, now: Instant) -> Ttl {
        match self.expires_at {
            None => Ttl::Forever,
            Some(at) => Ttl::Expires(at.saturating_duration_since(now)),
        }
    }

    fn footprint(key: &str, data: &[u8]) -> usize {
        key.len() + data.len()
    }
}

/// Expiry is kept at whole-second granularity.
fn round_up_to_secs(ttl: Duration) -> Duration {
    let secs = ttl.as_secs().saturating_add(u64::from(ttl.subsec_nanos() > 0));
    Duration::from_secs(secs)
}

struct Inner {
    entries: LruCache<String, Entry>,
    used_bytes: usize,
}

impl Inner {
    fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.pop(key)?;
        self.used_bytes -= Entry::footprint(key, &entry.data);
        Some(entry)
    }

    /// Look up a live entry, reclaiming it when expired.
    fn live(&mut self, key: &str, now: Instant) -> Option<&Entry> {
        let expired = self.entries.peek(key)?.is_expired(now);
        if expired {
            self.remove(key);
            return None;
        }
        self.entries.get(key)
    }

    fn insert(&mut self, key: &str, entry: Entry, capacity: usize) -> Result<(), CacheError> {
        let size = Entry::footprint(key, &entry.data);
        if size > capacity {
            return Err(CacheError::Capacity { size, capacity });
        }

        self.remove(key);

        let mut evicted = 0u64;
        while self.used_bytes + size > capacity {
            match self.entries.pop_lru() {
                Some((old_key, old)) => {
                    self.used_bytes -= Entry::footprint(&old_key, &old.data);
                    evicted += 1;
                }
                None => break,
            }
        }
        if evicted > 0 {
            counter!(METRIC_MEMORY_EVICT_TOTAL).increment(evicted);
            debug!(evicted, "evicted entries to make room");
        }

        self.used_bytes += size;
        self.entries.put(key.to_string(), entry);
        Ok(())
    }
}

/// In-memory provider with LRU eviction once `capacity` bytes are used.
///
/// Expired entries are reclaimed lazily when touched or when evicted.
pub struct MemoryProvider {
    inner: Mutex<Inner>,
    capacity_bytes: usize,
}

impl MemoryProvider {
    /// Create a provider bounded to `capacity_mib` mebibytes of keys and values.
    pub fn new(capacity_mib: usize) -> Self {
        Self::with_capacity_bytes(capacity_mib.saturating_mul(BYTES_PER_MIB))
    }

    pub fn with_capacity_bytes(capacity_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                used_bytes: 0,
            }),
            capacity_bytes,
        }
    }

    /// A panic while holding the lock leaves at worst a stale entry, so the
    /// poisoned guard is reused.
    fn lock(&self, op: &'static str) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            warn!(op, provider = "memory", "recovered poisoned memory provider lock");
            poisoned.into_inner()
        })
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    /// Bytes currently accounted to keys and values, including expired entries
    /// that have not been reclaimed yet.
    pub fn used_bytes(&self) -> usize {
        self.lock("used_bytes").used_bytes
    }

    pub fn len(&self) -> usize {
        self.lock("len").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheProvider for MemoryProvider {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<CachedValue, CacheError> {
        let now = Instant::now();
        let mut inner = self.lock("get");
        let entry = inner.live(key, now).ok_or(CacheError::NotFound)?;
        Ok(CachedValue::new(entry.data.clone(), entry.ttl(now)))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Ttl) -> Result<(), CacheError> {
        let mut inner = self.lock("set");
        if ttl.is_expired() {
            inner.remove(key);
            return Ok(());
        }
        let entry = Entry::new(value.to_vec(), ttl, Instant::now());
        inner.insert(key, entry, self.capacity_bytes)
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<(i64, Ttl), CacheError> {
        let now = Instant::now();
        let mut inner = self.lock("incr");
        let (current, expires_at) = {
            let entry = inner.live(key, now).ok_or(CacheError::NotFound)?;
            (parse_counter(&entry.data)?, entry.expires_at)
        };
        let next = current
            .checked_add(delta)
            .ok_or_else(|| CacheError::provider(format!("counter `{key}` overflowed")))?;

        let entry = Entry {
            data: next.to_string().into_bytes(),
            expires_at,
        };
        let ttl = entry.ttl(now);
        inner.insert(key, entry, self.capacity_bytes)?;
        Ok((next, ttl))
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.lock("del").remove(key);
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &[u8], ttl: Ttl) -> Result<bool, CacheError> {
        let now = Instant::now();
        let mut inner = self.lock("set_nx");
        if inner.live(key, now).is_some() {
            return Ok(false);
        }
        if ttl.is_expired() {
            return Ok(true);
        }
        inner.insert(key, Entry::new(value.to_vec(), ttl, now), self.capacity_bytes)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_returns_value_and_ttl() {
        let provider = MemoryProvider::new(1);
        provider
            .set("k", b"v", Ttl::from_secs(10))
            .await
            .expect("set");

        let value = provider.get("k").await.expect("hit");
        assert_eq!(value.data, b"v");
        let remaining = value.ttl.remaining().expect("finite ttl");
        assert!(remaining <= Duration::from_secs(10));
        assert!(remaining > Duration::from_secs(9));
    }

    #[tokio::test]
    async fn forever_entries_report_forever() {
        let provider = MemoryProvider::new(1);
        provider.set("k", b"v", Ttl::Forever).await.expect("set");
        assert_eq!(provider.get("k").await.expect("hit").ttl, Ttl::Forever);
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let provider = MemoryProvider::new(1);
        let err = provider.get("absent").await.expect_err("miss");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn ttl_is_rounded_up_to_whole_seconds() {
        let provider = MemoryProvider::new(1);
        provider
            .set("k", b"v", Ttl::from_millis(200))
            .await
            .expect("set");

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(provider.get("k").await.is_ok());
    }

    #[tokio::test]
    async fn expired_entries_are_reclaimed_on_read() {
        let provider = MemoryProvider::new(1);
        provider
            .set("k", b"value", Ttl::from_secs(1))
            .await
            .expect("set");
        assert_eq!(provider.used_bytes(), 6);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(provider.get("k").await.expect_err("expired").is_not_found());
        assert_eq!(provider.used_bytes(), 0);
        assert!(provider.is_empty());
    }

    #[tokio::test]
    async fn zero_ttl_set_removes_entry() {
        let provider = MemoryProvider::new(1);
        provider.set("k", b"v", Ttl::Forever).await.expect("set");
        provider
            .set("k", b"v", Ttl::Expires(Duration::ZERO))
            .await
            .expect("set expired");
        assert!(provider.get("k").await.is_err());
    }

    #[tokio::test]
    async fn least_recently_used_entry_is_evicted_at_capacity() {
        // Each entry is 2 bytes of key plus 4 bytes of value.
        let provider = MemoryProvider::with_capacity_bytes(12);
        provider.set("k1", b"aaaa", Ttl::Forever).await.expect("set");
        provider.set("k2", b"bbbb", Ttl::Forever).await.expect("set");

        // Touch k1 so k2 becomes the eviction candidate.
        provider.get("k1").await.expect("hit");
        provider.set("k3", b"cccc", Ttl::Forever).await.expect("set");

        assert!(provider.get("k1").await.is_ok());
        assert!(provider.get("k2").await.is_err());
        assert!(provider.get("k3").await.is_ok());
        assert_eq!(provider.used_bytes(), 12);
    }

    #[tokio::test]
    async fn overwrite_replaces_byte_accounting() {
        let provider = MemoryProvider::with_capacity_bytes(64);
        provider.set("k", b"aaaa", Ttl::Forever).await.expect("set");
        provider.set("k", b"aa", Ttl::Forever).await.expect("set");
        assert_eq!(provider.used_bytes(), 3);
        assert_eq!(provider.len(), 1);
    }

    #[tokio::test]
    async fn oversized_entry_is_rejected() {
        let provider = MemoryProvider::with_capacity_bytes(4);
        let err = provider
            .set("key", b"value", Ttl::Forever)
            .await
            .expect_err("too large");
        assert!(matches!(err, CacheError::Capacity { size: 8, capacity: 4 }));
    }

    #[tokio::test]
    async fn lifetimes_beyond_the_clock_are_kept_forever() {
        let provider = MemoryProvider::new(1);
        provider
            .set("k", b"v", Ttl::Expires(Duration::from_secs(u64::MAX / 2)))
            .await
            .expect("set");
        assert_eq!(provider.get("k").await.expect("hit").ttl, Ttl::Forever);

        assert!(
            provider
                .set_nx("lock", b"1", Ttl::Expires(Duration::MAX))
                .await
                .expect("set_nx")
        );
        assert!(provider.get("lock").await.is_ok());
    }

    #[test]
    fn rounding_saturates_at_the_largest_duration() {
        assert_eq!(round_up_to_secs(Duration::MAX), Duration::from_secs(u64::MAX));
        assert_eq!(
            round_up_to_secs(Duration::from_millis(1500)),
            Duration::from_secs(2)
        );
    }

    #[tokio::test]
    async fn incr_requires_existing_key() {
        let provider = MemoryProvider::new(1);
        let err = provider.incr("n", 1).await.expect_err("missing");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn incr_adds_delta_and_keeps_expiry() {
        let provider = MemoryProvider::new(1);
        provider
            .set("n", b"7", Ttl::from_secs(30))
            .await
            .expect("set");

        let (value, ttl) = provider.incr("n", 3).await.expect("incr");
        assert_eq!(value, 10);
        assert!(ttl.remaining().expect("finite") > Duration::from_secs(29));

        let (value, _) = provider.incr("n", -15).await.expect("incr");
        assert_eq!(value, -5);
        assert_eq!(provider.get("n").await.expect("hit").data, b"-5");
    }

    #[tokio::test]
    async fn incr_rejects_non_numeric_values() {
        let provider = MemoryProvider::new(1);
        provider.set("n", b"abc", Ttl::Forever).await.expect("set");
        assert!(matches!(
            provider.incr("n", 1).await,
            Err(CacheError::Provider { .. })
        ));
    }

    #[tokio::test]
    async fn del_is_idempotent() {
        let provider = MemoryProvider::new(1);
        provider.set("k", b"v", Ttl::Forever).await.expect("set");
        provider.del("k").await.expect("first delete");
        provider.del("k").await.expect("second delete");
        assert!(provider.get("k").await.is_err());
    }

    #[tokio::test]
    async fn set_nx_only_succeeds_when_absent() {
        let provider = MemoryProvider::new(1);
        assert!(
            provider
                .set_nx("lock", b"1", Ttl::from_secs(5))
                .await
                .expect("first")
        );
        assert!(
            !provider
                .set_nx("lock", b"1", Ttl::from_secs(5))
                .await
                .expect("second")
        );

        provider.del("lock").await.expect("release");
        assert!(
            provider
                .set_nx("lock", b"1", Ttl::from_secs(5))
                .await
                .expect("reacquire")
        );
    }
}

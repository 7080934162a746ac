//! Byte-level cache providers.
//!
//! A provider is a primitive key/value store with per-key expiry and an atomic
//! integer increment. Two implementations ship with the crate:
//!
//! - [`MemoryProvider`]: in-process LRU bounded by total bytes, second-resolution TTL
//! - [`RedisProvider`]: shared Redis store, millisecond TTL
//!
//! Providers are composed into tiers by [`CompoundProvider`](super::CompoundProvider).

#[cfg(test)]
pub(crate) mod faulty;
mod memory;
mod remote;

use std::time::Duration;

use async_trait::async_trait;

use super::error::CacheError;

pub use memory::MemoryProvider;
pub(crate) use memory::METRIC_MEMORY_EVICT_TOTAL;
pub use remote::RedisProvider;

/// Expiry attached to a cached value.
///
/// On reads this is the *residual* lifetime observed by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// The value never expires.
    Forever,
    /// The value expires after the given duration. A zero duration is already expired.
    Expires(Duration),
}

impl Ttl {
    pub fn from_secs(secs: u64) -> Self {
        Self::Expires(Duration::from_secs(secs))
    }

    pub fn from_millis(millis: u64) -> Self {
        Self::Expires(Duration::from_millis(millis))
    }

    /// Remaining lifetime, `None` for [`Ttl::Forever`].
    pub fn remaining(&self) -> Option<Duration> {
        match self {
            Self::Forever => None,
            Self::Expires(duration) => Some(*duration),
        }
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, Self::Expires(duration) if duration.is_zero())
    }
}

impl From<Duration> for Ttl {
    fn from(duration: Duration) -> Self {
        Self::Expires(duration)
    }
}

/// Raw bytes plus the residual TTL observed at read time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedValue {
    pub data: Vec<u8>,
    pub ttl: Ttl,
}

impl CachedValue {
    pub fn new(data: Vec<u8>, ttl: Ttl) -> Self {
        Self { data, ttl }
    }
}

/// Primitive cache contract shared by every backing store.
///
/// Implementations must be safe for concurrent use. `del` is idempotent and
/// `incr` fails with [`CacheError::NotFound`] when the key does not exist.
/// Counters are stored as base-10 `i64` text.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    /// Short label used in logs and metrics.
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<CachedValue, CacheError>;

    async fn set(&self, key: &str, value: &[u8], ttl: Ttl) -> Result<(), CacheError>;

    /// Add `delta` to an existing counter, returning the new value and the
    /// TTL remaining after the increment.
    async fn incr(&self, key: &str, delta: i64) -> Result<(i64, Ttl), CacheError>;

    async fn del(&self, key: &str) -> Result<(), CacheError>;

    /// Store `value` only if `key` is absent. Returns `false` when another
    /// holder already owns the key.
    async fn set_nx(&self, key: &str, value: &[u8], ttl: Ttl) -> Result<bool, CacheError>;
}

/// Parse a stored counter value.
pub(crate) fn parse_counter(data: &[u8]) -> Result<i64, CacheError> {
    let text = std::str::from_utf8(data)
        .map_err(|err| CacheError::provider(format!("counter is not utf-8: {err}")))?;
    text.trim()
        .parse::<i64>()
        .map_err(|err| CacheError::provider(format!("counter `{text}` is not an integer: {err}")))
}

//! Typed cache service over a byte-level provider.

use std::future::Future;
use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;

use super::codec::Codec;
use super::error::CacheError;
use super::keys::namespaced;
use super::provider::{CacheProvider, Ttl};

/// Namespaced, typed view of a provider.
///
/// Every key is stored as `prefix:key`, every write uses the service TTL and
/// values go through the service [`Codec`] (JSON unless configured otherwise).
#[derive(Clone)]
pub struct CacheService {
    ttl: Ttl,
    prefix: String,
    provider: Arc<dyn CacheProvider>,
    codec: Codec,
}

impl CacheService {
    pub fn new(ttl: Ttl, prefix: impl Into<String>, provider: Arc<dyn CacheProvider>) -> Self {
        Self {
            ttl,
            prefix: prefix.into(),
            provider,
            codec: Codec::default(),
        }
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    pub fn ttl(&self) -> Ttl {
        self.ttl
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn provider(&self) -> &Arc<dyn CacheProvider> {
        &self.provider
    }

    /// Full provider key for `key`.
    pub fn key(&self, key: &str) -> String {
        namespaced(&self.prefix, key)
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, CacheError> {
        let cached = self.provider.get(&self.key(key)).await?;
        self.codec.decode(&cached.data)
    }

    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        let bytes = self.codec.encode(value)?;
        self.provider.set(&self.key(key), &bytes, self.ttl).await
    }

    pub async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.provider.del(&self.key(key)).await
    }

    /// Read-through lookup.
    ///
    /// On a miss the producer runs and its value is stored before being
    /// returned. Producer errors are returned unchanged and nothing is cached.
    /// Concurrent misses on the same key each run the producer; there is no
    /// per-key single-flight here.
    pub async fn get_by_func<T, E, F, Fut>(&self, key: &str, producer: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.get::<T>(key).await {
            Ok(value) => return Ok(value),
            Err(CacheError::NotFound) => {}
            Err(err) => return Err(err.into()),
        }

        debug!(prefix = %self.prefix, key = %key, "cache miss, running producer");
        let value = producer().await?;
        self.set(key, &value).await?;
        Ok(value)
    }
}

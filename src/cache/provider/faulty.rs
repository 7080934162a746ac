//! Memory-backed provider whose operations can be made to fail, for tests of
//! error propagation through tiers.

use async_trait::async_trait;

use super::{CacheProvider, CachedValue, MemoryProvider, Ttl};
use crate::cache::error::CacheError;

pub(crate) struct FaultyProvider {
    inner: MemoryProvider,
    fail_get: bool,
    fail_set: bool,
    fail_del: bool,
}

impl FaultyProvider {
    fn new(fail_get: bool, fail_set: bool, fail_del: bool) -> Self {
        Self {
            inner: MemoryProvider::new(1),
            fail_get,
            fail_set,
            fail_del,
        }
    }

    pub(crate) fn failing_get() -> Self {
        Self::new(true, false, false)
    }

    pub(crate) fn failing_set() -> Self {
        Self::new(false, true, false)
    }

    pub(crate) fn failing_del() -> Self {
        Self::new(false, false, true)
    }

    /// Write straight to the backing store, bypassing injected failures.
    pub(crate) async fn seed(&self, key: &str, value: &[u8]) {
        self.inner
            .set(key, value, Ttl::Forever)
            .await
            .expect("seed faulty provider");
    }
}

fn injected(op: &str) -> CacheError {
    CacheError::provider(format!("injected {op} failure"))
}

#[async_trait]
impl CacheProvider for FaultyProvider {
    fn name(&self) -> &'static str {
        "faulty"
    }

    async fn get(&self, key: &str) -> Result<CachedValue, CacheError> {
        if self.fail_get {
            return Err(injected("get"));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Ttl) -> Result<(), CacheError> {
        if self.fail_set {
            return Err(injected("set"));
        }
        self.inner.set(key, value, ttl).await
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<(i64, Ttl), CacheError> {
        self.inner.incr(key, delta).await
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        if self.fail_del {
            return Err(injected("del"));
        }
        self.inner.del(key).await
    }

    async fn set_nx(&self, key: &str, value: &[u8], ttl: Ttl) -> Result<bool, CacheError> {
        self.inner.set_nx(key, value, ttl).await
    }
}

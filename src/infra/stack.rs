//! Wiring of providers, worker pool and HTTP cache from settings.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::cache::{CacheProvider, CacheSet, HttpCacheState, MemoryProvider};
use crate::config::Settings;
use crate::paging::WorkerPool;

use super::error::InfraError;
use super::redis;

/// Process-wide cache resources, built once at startup and cloned into
/// request handlers and paging services.
#[derive(Clone)]
pub struct CacheStack {
    shared: Arc<dyn CacheProvider>,
    local: Option<Arc<MemoryProvider>>,
    workers: WorkerPool,
    http: CacheSet,
    http_ttl: Duration,
}

impl CacheStack {
    /// Connect to Redis and assemble the stack.
    pub async fn connect(settings: &Settings) -> Result<Self, InfraError> {
        let shared: Arc<dyn CacheProvider> = Arc::new(redis::connect(&settings.redis).await?);
        Self::assemble(shared, settings)
    }

    /// Assemble the stack over an already constructed shared provider.
    pub fn assemble(
        shared: Arc<dyn CacheProvider>,
        settings: &Settings,
    ) -> Result<Self, InfraError> {
        if settings.http_cache.memory_tier && !settings.memory.enabled {
            return Err(InfraError::configuration(
                "http_cache.memory_tier requires memory.enabled",
            ));
        }

        let local = settings
            .memory
            .enabled
            .then(|| Arc::new(MemoryProvider::new(settings.memory.capacity_mib)));

        let mut http =
            CacheSet::new(Arc::clone(&shared)).with_prefix(&settings.http_cache.prefix);
        if let Some(local) = local.as_ref().filter(|_| settings.http_cache.memory_tier) {
            http = http.with_local_tier(Arc::clone(local) as Arc<dyn CacheProvider>);
        }

        info!(
            shared = shared.name(),
            memory_tier = local.is_some(),
            worker_pool_size = settings.paging.worker_pool_size,
            "cache stack ready"
        );

        Ok(Self {
            shared,
            local,
            workers: WorkerPool::new(settings.paging.worker_pool_size),
            http,
            http_ttl: settings.http_cache.ttl,
        })
    }

    pub fn shared(&self) -> &Arc<dyn CacheProvider> {
        &self.shared
    }

    pub fn local(&self) -> Option<&Arc<MemoryProvider>> {
        self.local.as_ref()
    }

    /// Pool to hand to every paging service so shard writes share one cap.
    pub fn workers(&self) -> &WorkerPool {
        &self.workers
    }

    pub fn cache_set(&self) -> &CacheSet {
        &self.http
    }

    /// Response cache state using the configured default TTL.
    pub fn http_cache(&self) -> HttpCacheState {
        self.http.http_cache(self.http_ttl)
    }
}

//! Ordered composition of providers with forward fill.
//!
//! ```text
//! get:  L0 → L1 → … → Ln-1   first hit wins, layers above the hit are filled
//! set:  L0, L1, …, Ln-1      every layer, stop at first error
//! incr: Ln-1 only            result mirrored into L0..Ln-2
//! ```
//!
//! The deepest layer is the source of truth for counters and locks; upper
//! layers are read-through copies and are never consulted by `incr`/`set_nx`.
//! Layers are not updated atomically, so a reader may see a new value in a deep
//! layer before a shallower one catches up.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use tracing::debug;

use super::error::CacheError;
use super::provider::{CacheProvider, CachedValue, Ttl};

pub(crate) const METRIC_PROVIDER_HIT_TOTAL: &str = "mintcache_provider_hit_total";
pub(crate) const METRIC_PROVIDER_MISS_TOTAL: &str = "mintcache_provider_miss_total";
pub(crate) const METRIC_PROVIDER_FILL_TOTAL: &str = "mintcache_provider_fill_total";

/// Multi-tier provider; index 0 is the hottest layer.
pub struct CompoundProvider {
    layers: Vec<Arc<dyn CacheProvider>>,
}

impl CompoundProvider {
    /// Build a compound provider. Returns `None` when `layers` is empty.
    pub fn new(layers: Vec<Arc<dyn CacheProvider>>) -> Option<Self> {
        (!layers.is_empty()).then_some(Self { layers })
    }

    pub fn layers(&self) -> &[Arc<dyn CacheProvider>] {
        &self.layers
    }

    fn anchor(&self) -> Result<(&Arc<dyn CacheProvider>, &[Arc<dyn CacheProvider>]), CacheError> {
        self.layers
            .split_last()
            .ok_or_else(|| CacheError::provider("compound provider has no layers"))
    }

    async fn mirror(
        upper: &[Arc<dyn CacheProvider>],
        key: &str,
        value: &[u8],
        ttl: Ttl,
    ) -> Result<(), CacheError> {
        for layer in upper {
            layer.set(key, value, ttl).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl CacheProvider for CompoundProvider {
    fn name(&self) -> &'static str {
        "compound"
    }

    async fn get(&self, key: &str) -> Result<CachedValue, CacheError> {
        let mut hit = None;
        for (index, layer) in self.layers.iter().enumerate() {
            match layer.get(key).await {
                Ok(value) => {
                    hit = Some((index, value));
                    break;
                }
                Err(CacheError::NotFound) => continue,
                Err(err) => return Err(err),
            }
        }

        let Some((index, value)) = hit else {
            counter!(METRIC_PROVIDER_MISS_TOTAL).increment(1);
            debug!(key = %key, outcome = "miss", "compound get");
            return Err(CacheError::NotFound);
        };

        counter!(METRIC_PROVIDER_HIT_TOTAL, "layer" => index.to_string()).increment(1);
        debug!(key = %key, layer = index, outcome = "hit", "compound get");

        for layer in &self.layers[..index] {
            layer.set(key, &value.data, value.ttl).await?;
            counter!(METRIC_PROVIDER_FILL_TOTAL, "layer" => layer.name()).increment(1);
        }

        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Ttl) -> Result<(), CacheError> {
        for layer in &self.layers {
            layer.set(key, value, ttl).await?;
        }
        Ok(())
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<(i64, Ttl), CacheError> {
        let (anchor, upper) = self.anchor()?;
        let (value, ttl) = anchor.incr(key, delta).await?;
        Self::mirror(upper, key, value.to_string().as_bytes(), ttl).await?;
        Ok((value, ttl))
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        for layer in &self.layers {
            layer.del(key).await?;
        }
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &[u8], ttl: Ttl) -> Result<bool, CacheError> {
        let (anchor, upper) = self.anchor()?;
        if !anchor.set_nx(key, value, ttl).await? {
            return Ok(false);
        }
        Self::mirror(upper, key, value, ttl).await?;
        Ok(true)
    }
}

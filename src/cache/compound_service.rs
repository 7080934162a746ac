//! Ordered composition of typed cache services.

use std::future::Future;

use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, instrument};

use super::error::CacheError;
use super::service::CacheService;

/// Typed counterpart of [`CompoundProvider`](super::CompoundProvider).
///
/// Each layer keeps its own prefix, TTL, codec and provider. Reads return the
/// first hit and backfill earlier layers with the decoded value using their own
/// TTLs. Writes and deletes go to every layer in order and stop at the first
/// error.
#[derive(Clone)]
pub struct CompoundService {
    pub(super) layers: Vec<CacheService>,
}

impl CompoundService {
    /// Returns `None` when `layers` is empty.
    pub fn new(layers: Vec<CacheService>) -> Option<Self> {
        (!layers.is_empty()).then_some(Self { layers })
    }

    pub fn layers(&self) -> &[CacheService] {
        &self.layers
    }

    #[instrument(skip_all, fields(key = %key))]
    pub async fn get<T>(&self, key: &str) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned,
    {
        for (index, layer) in self.layers.iter().enumerate() {
            match layer.get::<T>(key).await {
                Ok(value) => {
                    debug!(layer = index, outcome = "hit", "compound service get");
                    for upper in &self.layers[..index] {
                        upper.set(key, &value).await?;
                    }
                    return Ok(value);
                }
                Err(CacheError::NotFound) => continue,
                Err(err) => return Err(err),
            }
        }
        debug!(outcome = "miss", "compound service get");
        Err(CacheError::NotFound)
    }

    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        for layer in &self.layers {
            layer.set(key, value).await?;
        }
        Ok(())
    }

    pub async fn del(&self, key: &str) -> Result<(), CacheError> {
        for layer in &self.layers {
            layer.del(key).await?;
        }
        Ok(())
    }

    /// Read-through lookup across all layers. The producer runs once when every
    /// layer misses and its value is written to all of them.
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

        let value = producer().await?;
        self.set(key, &value).await?;
        Ok(value)
    }
}

//! Cache error taxonomy shared by providers and typed services.

use thiserror::Error;

/// Errors surfaced by cache providers and the typed services built on them.
///
/// `NotFound` is the single miss signal at every layer: providers report it for
/// absent or expired keys and services forward it unchanged.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache key not found")]
    NotFound,
    #[error("cache provider error: {message}")]
    Provider { message: String },
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),
    #[error("serialization failed: {message}")]
    Serialization { message: String },
    #[error("entry of {size} bytes exceeds cache capacity of {capacity} bytes")]
    Capacity { size: usize, capacity: usize },
}

impl CacheError {
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// True when the error is a plain miss rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

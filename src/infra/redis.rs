//! Redis connection pool bootstrap.

use deadpool_redis::{Config, Pool, Runtime};
use tracing::info;

use crate::cache::RedisProvider;
use crate::config::RedisSettings;

use super::error::InfraError;

/// Build a pool from settings. No connection is opened yet.
pub fn create_pool(settings: &RedisSettings) -> Result<Pool, InfraError> {
    let mut config = Config::from_url(settings.url.clone());
    let mut pool_config = config.get_pool_config();
    pool_config.max_size = settings.pool_size.get() as usize;
    pool_config.timeouts.wait = Some(settings.timeout);
    pool_config.timeouts.create = Some(settings.timeout);
    pool_config.timeouts.recycle = Some(settings.timeout);
    config.pool = Some(pool_config);

    Ok(config.create_pool(Some(Runtime::Tokio1))?)
}

/// Build the pool and verify the server answers `PING`.
pub async fn connect(settings: &RedisSettings) -> Result<RedisProvider, InfraError> {
    let provider = RedisProvider::new(create_pool(settings)?);
    provider.ping().await.map_err(InfraError::RedisUnreachable)?;

    info!(pool_size = settings.pool_size.get(), "connected to redis");
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use std::{num::NonZeroU32, time::Duration};

    use super::*;

    #[tokio::test]
    async fn pool_honours_configured_size() {
        let settings = RedisSettings {
            url: "redis://127.0.0.1:6379".to_string(),
            pool_size: NonZeroU32::new(3).expect("non-zero"),
            timeout: Duration::from_millis(250),
        };

        let pool = create_pool(&settings).expect("pool");
        assert_eq!(pool.status().max_size, 3);
    }
}

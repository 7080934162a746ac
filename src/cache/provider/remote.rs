//! Redis-backed provider.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use tracing::debug;

use super::{CacheProvider, CachedValue, Ttl};
use crate::cache::error::CacheError;

/// `PTTL` reply for a key without expiry.
const PTTL_NO_EXPIRY: i64 = -1;
/// `PTTL` reply for a missing key.
const PTTL_MISSING: i64 = -2;

/// Shared provider backed by a Redis connection pool.
///
/// TTLs are applied with millisecond precision. `incr` is emulated with
/// `EXISTS` + `INCRBY` + `PTTL` and is only best-effort atomic: a key expiring
/// between the existence check and the increment is recreated without expiry.
#[derive(Clone)]
pub struct RedisProvider {
    pool: Pool,
}

impl RedisProvider {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn connection(&self) -> Result<Connection, CacheError> {
        Ok(self.pool.get().await?)
    }

    /// Round-trip a `PING` (for health checks).
    pub async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

fn ttl_from_pttl(pttl: i64) -> Result<Ttl, CacheError> {
    match pttl {
        PTTL_NO_EXPIRY => Ok(Ttl::Forever),
        PTTL_MISSING => Err(CacheError::NotFound),
        millis if millis >= 0 => Ok(Ttl::Expires(Duration::from_millis(millis as u64))),
        other => Err(CacheError::provider(format!("unexpected PTTL reply {other}"))),
    }
}

/// Redis rejects `PX 0`, so sub-millisecond lifetimes are clamped to 1ms.
fn px_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl CacheProvider for RedisProvider {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<CachedValue, CacheError> {
        let mut conn = self.connection().await?;
        let (data, pttl): (Option<Vec<u8>>, i64) = redis::pipe()
            .cmd("GET")
            .arg(key)
            .cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await?;

        let data = data.ok_or(CacheError::NotFound)?;
        let ttl = ttl_from_pttl(pttl)?;
        Ok(CachedValue::new(data, ttl))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Ttl) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        match ttl {
            Ttl::Forever => {
                let _: () = redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .query_async(&mut conn)
                    .await?;
            }
            Ttl::Expires(duration) if duration.is_zero() => {
                let _: () = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
            }
            Ttl::Expires(duration) => {
                let _: () = redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("PX")
                    .arg(px_millis(duration))
                    .query_async(&mut conn)
                    .await?;
            }
        }
        debug!(key = %key, ttl = ?ttl, "redis set");
        Ok(())
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<(i64, Ttl), CacheError> {
        let mut conn = self.connection().await?;
        let exists: bool = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        if !exists {
            return Err(CacheError::NotFound);
        }

        let value: i64 = redis::cmd("INCRBY")
            .arg(key)
            .arg(delta)
            .query_async(&mut conn)
            .await?;
        let pttl: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
        Ok((value, ttl_from_pttl(pttl)?))
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let _: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &[u8], ttl: Ttl) -> Result<bool, CacheError> {
        let mut conn = self.connection().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(duration) = ttl.remaining() {
            cmd.arg("PX").arg(px_millis(duration));
        }
        let reply: Option<String> = cmd.query_async(&mut conn).await?;
        Ok(reply.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pttl_sentinels_map_to_ttl() {
        assert_eq!(ttl_from_pttl(-1).expect("forever"), Ttl::Forever);
        assert!(ttl_from_pttl(-2).expect_err("missing").is_not_found());
        assert_eq!(
            ttl_from_pttl(1500).expect("finite"),
            Ttl::from_millis(1500)
        );
        assert!(ttl_from_pttl(-3).is_err());
    }

    #[test]
    fn px_is_never_zero() {
        assert_eq!(px_millis(Duration::from_micros(10)), 1);
        assert_eq!(px_millis(Duration::from_secs(2)), 2000);
    }
}

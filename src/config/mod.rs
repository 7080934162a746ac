//! Configuration layer: typed settings with layered precedence (defaults → file → env).

use std::{num::NonZeroU32, path::Path, str::FromStr, time::Duration};

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::DEFAULT_HTTP_PREFIX;
use crate::paging::{DEFAULT_PRODUCER_TIMEOUT, DEFAULT_SHARD_SIZE, WorkerPool};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "mintcache";
const ENV_PREFIX: &str = "MINTCACHE";
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_REDIS_POOL_SIZE: u32 = 16;
const DEFAULT_REDIS_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_MEMORY_CAPACITY_MIB: u64 = 64;
const DEFAULT_RENEW_SECS: u64 = 60;
const DEFAULT_CACHE_SECS: u64 = 600;
const DEFAULT_HTTP_TTL_SECS: u64 = 5;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub redis: RedisSettings,
    pub memory: MemorySettings,
    pub paging: PagingSettings,
    pub http_cache: HttpCacheSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct RedisSettings {
    /// Validated `redis://`, `rediss://` or `redis+unix://` URL.
    pub url: String,
    pub pool_size: NonZeroU32,
    /// Applied to pool checkout and connection creation.
    pub timeout: Duration,
}

/// In-process tier. `capacity_mib` is the byte budget of the LRU.
#[derive(Debug, Clone)]
pub struct MemorySettings {
    pub enabled: bool,
    pub capacity_mib: usize,
}

#[derive(Debug, Clone)]
pub struct PagingSettings {
    pub shard_size: usize,
    pub renew_after: Duration,
    pub expire_after: Duration,
    pub producer_timeout: Duration,
    pub worker_pool_size: usize,
}

#[derive(Debug, Clone)]
pub struct HttpCacheSettings {
    pub prefix: String,
    pub ttl: Duration,
    /// Put the in-process tier in front of Redis for cached responses.
    pub memory_tier: bool,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings: `config/default.*`, then `mintcache.*`, then `config_file`
/// (required when given), then `MINTCACHE__SECTION__KEY` variables.
pub fn load(config_file: Option<&Path>) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let raw: RawSettings = builder.build()?.try_deserialize()?;
    Settings::from_raw(raw)
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            redis,
            memory,
            paging,
            http_cache,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            redis: build_redis_settings(redis)?,
            memory: build_memory_settings(memory)?,
            paging: build_paging_settings(paging)?,
            http_cache: build_http_cache_settings(http_cache)?,
        })
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            logging: LoggingSettings {
                level: LevelFilter::INFO,
                format: LogFormat::Compact,
            },
            redis: RedisSettings {
                url: DEFAULT_REDIS_URL.to_string(),
                pool_size: NonZeroU32::new(DEFAULT_REDIS_POOL_SIZE).unwrap_or(NonZeroU32::MIN),
                timeout: Duration::from_millis(DEFAULT_REDIS_TIMEOUT_MS),
            },
            memory: MemorySettings {
                enabled: false,
                capacity_mib: DEFAULT_MEMORY_CAPACITY_MIB as usize,
            },
            paging: PagingSettings {
                shard_size: DEFAULT_SHARD_SIZE,
                renew_after: Duration::from_secs(DEFAULT_RENEW_SECS),
                expire_after: Duration::from_secs(DEFAULT_CACHE_SECS),
                producer_timeout: DEFAULT_PRODUCER_TIMEOUT,
                worker_pool_size: WorkerPool::DEFAULT_SIZE,
            },
            http_cache: HttpCacheSettings {
                prefix: DEFAULT_HTTP_PREFIX.to_string(),
                ttl: Duration::from_secs(DEFAULT_HTTP_TTL_SECS),
                memory_tier: false,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    redis: RawRedisSettings,
    memory: RawMemorySettings,
    paging: RawPagingSettings,
    http_cache: RawHttpCacheSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRedisSettings {
    url: Option<String>,
    pool_size: Option<u64>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawMemorySettings {
    enabled: Option<bool>,
    capacity_mib: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPagingSettings {
    shard_size: Option<u64>,
    renew_seconds: Option<u64>,
    cache_seconds: Option<u64>,
    producer_timeout_seconds: Option<u64>,
    worker_pool_size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawHttpCacheSettings {
    prefix: Option<String>,
    ttl_seconds: Option<u64>,
    memory_tier: Option<bool>,
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_redis_settings(redis: RawRedisSettings) -> Result<RedisSettings, LoadError> {
    let raw_url = redis
        .url
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string());
    let url = Url::parse(&raw_url)
        .map_err(|err| LoadError::invalid("redis.url", format!("invalid URL: {err}")))?;
    if !matches!(url.scheme(), "redis" | "rediss" | "redis+unix") {
        return Err(LoadError::invalid(
            "redis.url",
            format!("unsupported scheme `{}`", url.scheme()),
        ));
    }

    let pool_size = non_zero_u32(
        redis.pool_size.unwrap_or(DEFAULT_REDIS_POOL_SIZE.into()),
        "redis.pool_size",
    )?;
    let timeout_ms = redis.timeout_ms.unwrap_or(DEFAULT_REDIS_TIMEOUT_MS);
    if timeout_ms == 0 {
        return Err(LoadError::invalid(
            "redis.timeout_ms",
            "must be greater than zero",
        ));
    }

    Ok(RedisSettings {
        url: raw_url,
        pool_size,
        timeout: Duration::from_millis(timeout_ms),
    })
}

fn build_memory_settings(memory: RawMemorySettings) -> Result<MemorySettings, LoadError> {
    let capacity_mib = non_zero_usize(
        memory.capacity_mib.unwrap_or(DEFAULT_MEMORY_CAPACITY_MIB),
        "memory.capacity_mib",
    )?;

    Ok(MemorySettings {
        enabled: memory.enabled.unwrap_or(false),
        capacity_mib,
    })
}

fn build_paging_settings(paging: RawPagingSettings) -> Result<PagingSettings, LoadError> {
    let shard_size = non_zero_usize(
        paging.shard_size.unwrap_or(DEFAULT_SHARD_SIZE as u64),
        "paging.shard_size",
    )?;
    let renew_seconds = paging.renew_seconds.unwrap_or(DEFAULT_RENEW_SECS);
    if renew_seconds == 0 {
        return Err(LoadError::invalid(
            "paging.renew_seconds",
            "must be greater than zero",
        ));
    }
    let cache_seconds = paging.cache_seconds.unwrap_or(DEFAULT_CACHE_SECS);
    if cache_seconds < renew_seconds {
        return Err(LoadError::invalid(
            "paging.cache_seconds",
            format!("must be at least renew_seconds ({renew_seconds})"),
        ));
    }
    let producer_timeout_seconds = paging
        .producer_timeout_seconds
        .unwrap_or(DEFAULT_PRODUCER_TIMEOUT.as_secs());
    if producer_timeout_seconds == 0 {
        return Err(LoadError::invalid(
            "paging.producer_timeout_seconds",
            "must be greater than zero",
        ));
    }
    let worker_pool_size = non_zero_usize(
        paging
            .worker_pool_size
            .unwrap_or(WorkerPool::DEFAULT_SIZE as u64),
        "paging.worker_pool_size",
    )?;

    Ok(PagingSettings {
        shard_size,
        renew_after: Duration::from_secs(renew_seconds),
        expire_after: Duration::from_secs(cache_seconds),
        producer_timeout: Duration::from_secs(producer_timeout_seconds),
        worker_pool_size,
    })
}

fn build_http_cache_settings(
    http_cache: RawHttpCacheSettings,
) -> Result<HttpCacheSettings, LoadError> {
    let prefix = http_cache
        .prefix
        .unwrap_or_else(|| DEFAULT_HTTP_PREFIX.to_string());
    if prefix.trim().is_empty() {
        return Err(LoadError::invalid(
            "http_cache.prefix",
            "prefix must not be empty",
        ));
    }
    let ttl_seconds = http_cache.ttl_seconds.unwrap_or(DEFAULT_HTTP_TTL_SECS);
    if ttl_seconds == 0 {
        return Err(LoadError::invalid(
            "http_cache.ttl_seconds",
            "must be greater than zero",
        ));
    }

    Ok(HttpCacheSettings {
        prefix,
        ttl: Duration::from_secs(ttl_seconds),
        memory_tier: http_cache.memory_tier.unwrap_or(false),
    })
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<usize, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    usize::try_from(value)
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))
}

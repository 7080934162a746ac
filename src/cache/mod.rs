//! Multi-tier caching.
//!
//! Three levels build on each other:
//!
//! - **Providers** store raw bytes with a TTL: [`MemoryProvider`] (in-process
//!   LRU), [`RedisProvider`], and [`CompoundProvider`] which stacks them with
//!   read-through backfill.
//! - **Services** add a namespace prefix, a fixed TTL and a [`Codec`]:
//!   [`CacheService`] and its layered counterpart [`CompoundService`].
//! - **HTTP**: [`response_cache_layer`] caches GET responses through a
//!   [`CompoundService`] built by [`CacheSet::http_cache`].
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use axum::{Router, middleware::from_fn_with_state, routing::get};
//! use mintcache::cache::{CacheSet, MemoryProvider, response_cache_layer};
//!
//! let shared = Arc::new(MemoryProvider::new(64));
//! let set = CacheSet::new(shared);
//! let app: Router = Router::new()
//!     .route("/collections", get(|| async { "[]" }))
//!     .layer(from_fn_with_state(
//!         set.http_cache(Duration::from_secs(30)),
//!         response_cache_layer,
//!     ));
//! ```

mod codec;
mod compound;
mod compound_service;
mod error;
pub mod keys;
mod middleware;
mod provider;
mod service;

pub use codec::Codec;
pub use compound::CompoundProvider;
pub use compound_service::CompoundService;
pub use error::CacheError;
pub use middleware::{
    CacheSet, CachedResponse, DEFAULT_HTTP_PREFIX, HttpCacheState, MAX_CACHED_BODY_BYTES,
    response_cache_layer,
};
pub use provider::{CacheProvider, CachedValue, MemoryProvider, RedisProvider, Ttl};
pub use service::CacheService;

pub(crate) use compound::{
    METRIC_PROVIDER_FILL_TOTAL, METRIC_PROVIDER_HIT_TOTAL, METRIC_PROVIDER_MISS_TOTAL,
};
pub(crate) use middleware::{METRIC_HTTP_HIT_TOTAL, METRIC_HTTP_MISS_TOTAL};
pub(crate) use provider::METRIC_MEMORY_EVICT_TOTAL;

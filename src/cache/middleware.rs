//! Cache-aside HTTP response cache.
//!
//! Responses to GET requests are stored under a fingerprint of the canonical
//! request URL (see [`request_fingerprint`]). Anything with a status below 400
//! is cacheable; `Cache-Control` is not consulted. Event streams, bodies of
//! unknown length and bodies over [`MAX_CACHED_BODY_BYTES`] pass through
//! uncached. Cache failures never fail the request: read errors degrade to a
//! miss and write errors are logged.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, HttpBody},
    extract::State,
    http::{
        HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode, header::CONTENT_TYPE,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::codec::Codec;
use super::compound_service::CompoundService;
use super::error::CacheError;
use super::keys::request_fingerprint;
use super::provider::{CacheProvider, Ttl};
use super::service::CacheService;

/// Namespace for cached HTTP responses.
pub const DEFAULT_HTTP_PREFIX: &str = "cacheHttp";

/// Largest response body the middleware will buffer and store.
pub const MAX_CACHED_BODY_BYTES: usize = 1024 * 1024;

const EVENT_STREAM: &str = "text/event-stream";

pub(crate) const METRIC_HTTP_HIT_TOTAL: &str = "mintcache_http_hit_total";
pub(crate) const METRIC_HTTP_MISS_TOTAL: &str = "mintcache_http_miss_total";

/// Cached body and headers of a successful response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub body: Bytes,
    pub headers: BTreeMap<String, Vec<String>>,
}

impl CachedResponse {
    fn capture(headers: &HeaderMap, body: Bytes) -> Self {
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in headers {
            if let Ok(value) = value.to_str() {
                grouped
                    .entry(name.as_str().to_string())
                    .or_default()
                    .push(value.to_string());
            }
        }
        Self {
            body,
            headers: grouped,
        }
    }

    /// Rebuild a `200 OK` response; multi-valued headers are joined with `,`.
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = StatusCode::OK;

        let headers = response.headers_mut();
        for (name, values) in self.headers {
            let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&values.join(",")),
            ) else {
                continue;
            };
            headers.insert(name, value);
        }
        response
    }
}

/// Backing stores shared by every cached route.
///
/// The shared (Redis) provider is always used. The in-process tier is off
/// unless [`CacheSet::with_local_tier`] is called.
#[derive(Clone)]
pub struct CacheSet {
    shared: Arc<dyn CacheProvider>,
    local: Option<Arc<dyn CacheProvider>>,
    prefix: String,
}

impl CacheSet {
    pub fn new(shared: Arc<dyn CacheProvider>) -> Self {
        Self {
            shared,
            local: None,
            prefix: DEFAULT_HTTP_PREFIX.to_string(),
        }
    }

    pub fn with_local_tier(mut self, local: Arc<dyn CacheProvider>) -> Self {
        self.local = Some(local);
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Build the per-route state for a response cache with the given TTL.
    pub fn http_cache(&self, ttl: Duration) -> HttpCacheState {
        let ttl = Ttl::Expires(ttl);
        let mut layers = Vec::with_capacity(2);
        if let Some(local) = &self.local {
            layers.push(
                CacheService::new(ttl, self.prefix.clone(), Arc::clone(local))
                    .with_codec(Codec::MessagePack),
            );
        }
        layers.push(
            CacheService::new(ttl, self.prefix.clone(), Arc::clone(&self.shared))
                .with_codec(Codec::MessagePack),
        );

        HttpCacheState {
            cache: CompoundService { layers },
        }
    }
}

/// Per-route state consumed by [`response_cache_layer`].
#[derive(Clone)]
pub struct HttpCacheState {
    cache: CompoundService,
}

impl HttpCacheState {
    pub fn cache(&self) -> &CompoundService {
        &self.cache
    }
}

/// Middleware serving cached responses and storing cacheable ones.
///
/// Mount with `axum::middleware::from_fn_with_state(set.http_cache(ttl), response_cache_layer)`.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn response_cache_layer(
    State(state): State<HttpCacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() != Method::GET {
        return next.run(request).await;
    }

    let key = request_fingerprint(request.uri().path(), request.uri().query());

    match state.cache.get::<CachedResponse>(&key).await {
        Ok(cached) => {
            counter!(METRIC_HTTP_HIT_TOTAL).increment(1);
            debug!(cache = "http", outcome = "hit", key = %key, "serving cached response");
            return cached.into_response();
        }
        Err(CacheError::NotFound) => {}
        Err(err) => {
            warn!(key = %key, error = %err, "response cache read failed, treating as miss");
        }
    }

    counter!(METRIC_HTTP_MISS_TOTAL).increment(1);
    debug!(cache = "http", outcome = "miss", key = %key, "executing handler");

    let response = next.run(request).await;
    if response.status().as_u16() >= 400 {
        return response;
    }
    if let Some(reason) = uncacheable_body(&response) {
        debug!(key = %key, reason, "passing response through uncached");
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_CACHED_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(key = %key, error = %err, "failed to buffer response body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let cached = CachedResponse::capture(&parts.headers, bytes.clone());
    if let Err(err) = state.cache.set(&key, &cached).await {
        warn!(key = %key, error = %err, "failed to store cached response");
    }

    Response::from_parts(parts, Body::from(bytes))
}

/// Why a successful response must not be buffered, if it must not.
fn uncacheable_body(response: &Response) -> Option<&'static str> {
    let is_event_stream = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with(EVENT_STREAM));
    if is_event_stream {
        return Some("event stream");
    }

    match response.body().size_hint().exact() {
        None => Some("unknown body length"),
        Some(len) if len > MAX_CACHED_BODY_BYTES as u64 => Some("body too large"),
        Some(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::provider::MemoryProvider;

    #[test]
    fn capture_groups_repeated_headers() {
        let mut headers = HeaderMap::new();
        headers.append("x-tag", HeaderValue::from_static("b"));
        headers.append("x-tag", HeaderValue::from_static("a"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));

        let cached = CachedResponse::capture(&headers, Bytes::from_static(b"hi"));
        assert_eq!(cached.headers["x-tag"], vec!["b", "a"]);
        assert_eq!(cached.headers["content-type"], vec!["text/plain"]);
    }

    #[test]
    fn restored_response_is_ok_with_joined_headers() {
        let cached = CachedResponse {
            body: Bytes::from_static(b"hi"),
            headers: BTreeMap::from([("x-tag".to_string(), vec!["b".into(), "a".into()])]),
        };
        let response = cached.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-tag"], "b,a");
    }

    #[test]
    fn local_tier_is_off_by_default() {
        let set = CacheSet::new(Arc::new(MemoryProvider::new(1)));
        assert_eq!(set.http_cache(Duration::from_secs(5)).cache().layers().len(), 1);

        let set = set.with_local_tier(Arc::new(MemoryProvider::new(1)));
        assert_eq!(set.http_cache(Duration::from_secs(5)).cache().layers().len(), 2);
    }
}

use std::fmt;
use std::future::Future;
use std::io::Cursor as ByteReader;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, info, instrument, warn};

use super::cursor::{Cursor, now_nanos};
use super::error::{BoxError, PagingError};
use super::pool::WorkerPool;
use crate::cache::keys::join;
use crate::cache::{CacheError, CacheProvider, Ttl};
use crate::config::PagingSettings;

pub(crate) const METRIC_PAGING_REBUILD_TOTAL: &str = "mintcache_paging_rebuild_total";
pub(crate) const METRIC_PAGING_LOCK_CONTENTION_TOTAL: &str =
    "mintcache_paging_lock_contention_total";
pub(crate) const METRIC_PAGING_PRODUCE_MS: &str = "mintcache_paging_produce_ms";

const KEY_ROOT: &str = "pagingService";
const LATEST_SEGMENT: &str = "la";
const LOCK_SEGMENT: &str = "lock";
const LOCK_VALUE: &[u8] = b"1";

pub const DEFAULT_SHARD_SIZE: usize = 100;
pub const DEFAULT_PRODUCER_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of the full ordered list behind a paged key.
///
/// Ordering is the producer's responsibility. Any `Fn(String) -> Future`
/// returning `Result<Vec<T>, BoxError>` is a producer.
#[async_trait]
pub trait Producer<T>: Send + Sync {
    async fn produce(&self, key: &str) -> Result<Vec<T>, BoxError>;
}

#[async_trait]
impl<T, F, Fut> Producer<T> for F
where
    T: Send + 'static,
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<T>, BoxError>> + Send,
{
    async fn produce(&self, key: &str) -> Result<Vec<T>, BoxError> {
        (self)(key.to_string()).await
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Cursor for the following page; empty when there is none.
    pub next: String,
    /// Length of the whole snapshot.
    pub total: usize,
}

impl<T> Page<T> {
    pub fn has_next(&self) -> bool {
        !self.next.is_empty()
    }
}

/// Read side of a paged listing, for callers that only need pages.
#[async_trait]
pub trait Paginate<T>: Send + Sync {
    async fn page(&self, key: &str, cursor: &str, size: usize) -> Result<Page<T>, PagingError>;

    /// Hook for forced rebuilds. Does nothing unless overridden.
    async fn update(&self, _key: &str) -> Result<(), PagingError> {
        Ok(())
    }
}

/// What happened to the snapshot after a rebuild ran the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildOutcome {
    /// Shards and latest pointer were written.
    Stored,
    /// Another rebuild holds the lock; nothing was written.
    Contended,
    /// The lock was taken but a write failed. Cursors into this snapshot will
    /// report a bad cursor.
    StoreFailed,
}

/// Cursor-paged listings backed by sharded snapshots.
///
/// A rebuild runs the producer, stores its output as shards of `shard_size`
/// elements under keys embedding the snapshot timestamp, and records the first
/// cursor as the key's latest pointer. Reads with an empty cursor serve the
/// latest snapshot while it is younger than the renew window and rebuild
/// otherwise. Cursors stay valid until their snapshot is older than the cache
/// window; an age equal to the window is still accepted.
///
/// Rebuilds are single-flighted across processes with a `set_nx` lock whose
/// TTL equals the producer timeout. A caller that loses the lock still gets
/// its page from the in-memory result but stores nothing.
///
/// The element type is fixed by the service, so a page can only be read into
/// the producer's own type:
///
/// ```compile_fail
/// # async fn demo(service: mintcache::paging::PagingService<u64>) {
/// let page: mintcache::paging::Page<String> = service.page("k", "", 10).await.unwrap();
/// # }
/// ```
pub struct PagingService<T> {
    provider: Arc<dyn CacheProvider>,
    key_prefix: String,
    producer: Arc<dyn Producer<T>>,
    renew_after: Duration,
    expire_after: Duration,
    shard_size: usize,
    producer_timeout: Duration,
    pool: WorkerPool,
}

impl<T> Clone for PagingService<T> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            key_prefix: self.key_prefix.clone(),
            producer: Arc::clone(&self.producer),
            renew_after: self.renew_after,
            expire_after: self.expire_after,
            shard_size: self.shard_size,
            producer_timeout: self.producer_timeout,
            pool: self.pool.clone(),
        }
    }
}

impl<T> fmt::Debug for PagingService<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PagingService")
            .field("key_prefix", &self.key_prefix)
            .field("provider", &self.provider.name())
            .field("renew_after", &self.renew_after)
            .field("expire_after", &self.expire_after)
            .field("shard_size", &self.shard_size)
            .field("producer_timeout", &self.producer_timeout)
            .finish_non_exhaustive()
    }
}

impl<T> PagingService<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn builder(
        provider: Arc<dyn CacheProvider>,
        key_prefix: impl Into<String>,
        producer: impl Producer<T> + 'static,
    ) -> PagingServiceBuilder<T> {
        PagingServiceBuilder {
            provider,
            key_prefix: key_prefix.into(),
            producer: Arc::new(producer),
            renew_after: None,
            expire_after: None,
            shard_size: DEFAULT_SHARD_SIZE,
            producer_timeout: DEFAULT_PRODUCER_TIMEOUT,
            pool: None,
            _marker: PhantomData,
        }
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn shard_size(&self) -> usize {
        self.shard_size
    }

    pub fn renew_after(&self) -> Duration {
        self.renew_after
    }

    pub fn expire_after(&self) -> Duration {
        self.expire_after
    }

    pub fn shard_key(&self, key: &str, created_ts: i64, index: usize) -> String {
        join(&[
            KEY_ROOT,
            self.key_prefix.as_str(),
            key,
            created_ts.to_string().as_str(),
            index.to_string().as_str(),
        ])
    }

    pub fn latest_key(&self, key: &str) -> String {
        join(&[KEY_ROOT, LATEST_SEGMENT, self.key_prefix.as_str(), key])
    }

    pub fn lock_key(&self, key: &str) -> String {
        join(&[KEY_ROOT, LOCK_SEGMENT, self.key_prefix.as_str(), key])
    }

    /// Read up to `size` elements.
    ///
    /// An empty `cursor` asks for the first page of the current snapshot.
    /// Otherwise the cursor must come from an earlier page of this key.
    #[instrument(skip_all, fields(prefix = %self.key_prefix, key = %key, size = size))]
    pub async fn page(&self, key: &str, cursor: &str, size: usize) -> Result<Page<T>, PagingError> {
        let now = now_nanos();

        if !cursor.is_empty() {
            let cursor = Cursor::decode(cursor)?;
            if cursor.age(now) > self.expire_after {
                return Err(PagingError::bad_cursor("snapshot expired"));
            }
            return self.serve(key, cursor, size).await;
        }

        match self.latest(key).await? {
            Some(latest) if latest.age(now) <= self.renew_after => {
                match self.serve(key, latest, size).await {
                    Err(PagingError::BadCursor(reason)) => {
                        debug!(reason = %reason, "latest snapshot unreadable, rebuilding");
                    }
                    served => return served,
                }
            }
            Some(_) => debug!("latest snapshot stale, rebuilding"),
            None => debug!("no snapshot, rebuilding"),
        }

        self.rebuild(key, size).await.map(|(page, _)| page)
    }

    /// Rebuild the snapshot now regardless of its age.
    #[instrument(skip_all, fields(prefix = %self.key_prefix, key = %key))]
    pub async fn refresh(&self, key: &str) -> Result<RebuildOutcome, PagingError> {
        self.rebuild(key, 0).await.map(|(_, outcome)| outcome)
    }

    async fn latest(&self, key: &str) -> Result<Option<Cursor>, PagingError> {
        let cached = match self.provider.get(&self.latest_key(key)).await {
            Ok(cached) => cached,
            Err(CacheError::NotFound) => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let decoded = std::str::from_utf8(&cached.data)
            .map_err(|_| PagingError::bad_cursor("latest pointer is not UTF-8"))
            .and_then(Cursor::decode);
        match decoded {
            Ok(cursor) => Ok(Some(cursor)),
            Err(err) => {
                warn!(error = %err, "ignoring corrupt latest pointer");
                Ok(None)
            }
        }
    }

    async fn serve(&self, key: &str, cursor: Cursor, size: usize) -> Result<Page<T>, PagingError> {
        let take = size.min(cursor.remaining());
        if take == 0 {
            return Ok(Page {
                items: Vec::new(),
                next: cursor.next_token(),
                total: cursor.total(),
            });
        }

        let offset = cursor.offset();
        let first_shard = offset / self.shard_size;
        let end_shard = (offset + take).div_ceil(self.shard_size);

        let mut bytes = Vec::new();
        for index in first_shard..end_shard {
            let shard_key = self.shard_key(key, cursor.created_ts(), index);
            match self.provider.get(&shard_key).await {
                Ok(shard) => bytes.extend_from_slice(&shard.data),
                Err(CacheError::NotFound) => {
                    return Err(PagingError::bad_cursor(format!(
                        "shard {index} of snapshot {} is gone",
                        cursor.created_ts()
                    )));
                }
                Err(err) => return Err(err.into()),
            }
        }

        let elements: Vec<T> = decode_elements(&bytes)?;
        let start = offset % self.shard_size;
        if elements.len() < start + take {
            return Err(PagingError::bad_cursor(format!(
                "snapshot {} holds fewer elements than its cursor claims",
                cursor.created_ts()
            )));
        }
        let items: Vec<T> = elements.into_iter().skip(start).take(take).collect();

        debug!(offset, served = items.len(), total = cursor.total(), "served from snapshot");
        Ok(Page {
            items,
            next: cursor.advanced(take).next_token(),
            total: cursor.total(),
        })
    }

    async fn rebuild(
        &self,
        key: &str,
        size: usize,
    ) -> Result<(Page<T>, RebuildOutcome), PagingError> {
        counter!(METRIC_PAGING_REBUILD_TOTAL).increment(1);
        info!("rebuilding snapshot");

        let started = Instant::now();
        let produced =
            tokio::time::timeout(self.producer_timeout, self.producer.produce(key)).await;
        let elements = match produced {
            Ok(Ok(elements)) => elements,
            Ok(Err(err)) => return Err(PagingError::Producer(err)),
            Err(_) => return Err(PagingError::ProducerTimeout(self.producer_timeout)),
        };
        histogram!(METRIC_PAGING_PRODUCE_MS).record(started.elapsed().as_secs_f64() * 1000.0);

        let cursor = Cursor::new(now_nanos(), elements.len(), 0);
        let take = size.min(elements.len());
        let items: Vec<T> = decode_elements(&encode_elements(&elements[..take])?)?;
        let page = Page {
            items,
            next: cursor.advanced(take).next_token(),
            total: cursor.total(),
        };

        let outcome = self.store(key, cursor, elements).await?;
        debug!(total = cursor.total(), outcome = ?outcome, "rebuild finished");
        Ok((page, outcome))
    }

    async fn store(
        &self,
        key: &str,
        cursor: Cursor,
        elements: Vec<T>,
    ) -> Result<RebuildOutcome, PagingError> {
        let lock_key = self.lock_key(key);
        let acquired = self
            .provider
            .set_nx(&lock_key, LOCK_VALUE, Ttl::Expires(self.producer_timeout))
            .await?;
        if !acquired {
            counter!(METRIC_PAGING_LOCK_CONTENTION_TOTAL).increment(1);
            info!("rebuild lock held elsewhere, skipping snapshot write");
            return Ok(RebuildOutcome::Contended);
        }

        let written = self.write_snapshot(key, cursor, &elements).await;
        if let Err(err) = self.provider.del(&lock_key).await {
            warn!(error = %err, "failed to release rebuild lock");
        }

        match written {
            Ok(()) => Ok(RebuildOutcome::Stored),
            Err(err) => {
                warn!(error = %err, "snapshot write failed");
                Ok(RebuildOutcome::StoreFailed)
            }
        }
    }

    async fn write_snapshot(
        &self,
        key: &str,
        cursor: Cursor,
        elements: &[T],
    ) -> Result<(), CacheError> {
        let ttl = Ttl::Expires(self.expire_after);

        let mut jobs = Vec::with_capacity(elements.len().div_ceil(self.shard_size));
        for (index, chunk) in elements.chunks(self.shard_size).enumerate() {
            let bytes = encode_elements(chunk)?;
            let shard_key = self.shard_key(key, cursor.created_ts(), index);
            let provider = Arc::clone(&self.provider);
            jobs.push(async move { provider.set(&shard_key, &bytes, ttl).await });
        }
        self.pool.run_all(jobs).await?;

        self.provider
            .set(&self.latest_key(key), cursor.encode().as_bytes(), ttl)
            .await
    }
}

#[async_trait]
impl<T> Paginate<T> for PagingService<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn page(&self, key: &str, cursor: &str, size: usize) -> Result<Page<T>, PagingError> {
        PagingService::page(self, key, cursor, size).await
    }
}

/// Builder for [`PagingService`]. Both windows must be set before `build`.
pub struct PagingServiceBuilder<T> {
    provider: Arc<dyn CacheProvider>,
    key_prefix: String,
    producer: Arc<dyn Producer<T>>,
    renew_after: Option<Duration>,
    expire_after: Option<Duration>,
    shard_size: usize,
    producer_timeout: Duration,
    pool: Option<WorkerPool>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> PagingServiceBuilder<T> {
    /// Empty-cursor reads rebuild once the snapshot is older than this.
    pub fn renew_after(mut self, window: Duration) -> Self {
        self.renew_after = Some(window);
        self
    }

    /// Snapshots and their cursors are unusable once older than this.
    pub fn expire_after(mut self, window: Duration) -> Self {
        self.expire_after = Some(window);
        self
    }

    pub fn shard_size(mut self, shard_size: usize) -> Self {
        self.shard_size = shard_size;
        self
    }

    pub fn producer_timeout(mut self, timeout: Duration) -> Self {
        self.producer_timeout = timeout;
        self
    }

    /// Share a pool with other services. A private default pool is used otherwise.
    pub fn worker_pool(mut self, pool: WorkerPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Apply windows, shard size and timeout from settings. The worker pool is
    /// not taken from settings since it is meant to be shared.
    pub fn settings(self, settings: &PagingSettings) -> Self {
        self.renew_after(settings.renew_after)
            .expire_after(settings.expire_after)
            .shard_size(settings.shard_size)
            .producer_timeout(settings.producer_timeout)
    }

    pub fn build(self) -> Result<PagingService<T>, PagingError> {
        let renew_after = self
            .renew_after
            .ok_or_else(|| PagingError::InvalidConfig("renew window is required".into()))?;
        let expire_after = self
            .expire_after
            .ok_or_else(|| PagingError::InvalidConfig("cache window is required".into()))?;

        if renew_after.is_zero() {
            return Err(PagingError::InvalidConfig("renew window must be positive".into()));
        }
        if renew_after > expire_after {
            return Err(PagingError::InvalidConfig(format!(
                "renew window {renew_after:?} exceeds cache window {expire_after:?}"
            )));
        }
        if self.shard_size == 0 {
            return Err(PagingError::InvalidConfig("shard size must be positive".into()));
        }
        if self.producer_timeout.is_zero() {
            return Err(PagingError::InvalidConfig("producer timeout must be positive".into()));
        }

        Ok(PagingService {
            provider: self.provider,
            key_prefix: self.key_prefix,
            producer: self.producer,
            renew_after,
            expire_after,
            shard_size: self.shard_size,
            producer_timeout: self.producer_timeout,
            pool: self.pool.unwrap_or_default(),
        })
    }
}

/// MessagePack-encode each element back to back, structs as field-name maps.
/// Concatenating the output of consecutive shards yields one valid element
/// stream.
pub(crate) fn encode_elements<T: Serialize>(elements: &[T]) -> Result<Vec<u8>, CacheError> {
    let mut bytes = Vec::new();
    for element in elements {
        rmp_serde::encode::write_named(&mut bytes, element)
            .map_err(|err| CacheError::serialization(format!("shard encode: {err}")))?;
    }
    Ok(bytes)
}

pub(crate) fn decode_elements<T: DeserializeOwned>(bytes: &[u8]) -> Result<Vec<T>, CacheError> {
    let mut reader = ByteReader::new(bytes);
    let mut elements = Vec::new();
    while (reader.position() as usize) < bytes.len() {
        let element = rmp_serde::from_read(&mut reader)
            .map_err(|err| CacheError::serialization(format!("shard decode: {err}")))?;
        elements.push(element);
    }
    Ok(elements)
}

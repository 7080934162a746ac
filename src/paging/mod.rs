//! Cursor pagination over cached snapshots.
//!
//! A [`PagingService`] turns an expensive ordered query (a [`Producer`]) into
//! cheap cursor reads. The query result is stored as a snapshot split into
//! fixed-size shards, and clients walk it with opaque [`Cursor`] tokens that pin
//! the snapshot they started on. Snapshots are immutable, so concurrent readers
//! never see a page mixing two snapshots.
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use mintcache::cache::MemoryProvider;
//! use mintcache::paging::{BoxError, PagingService};
//!
//! # async fn demo() -> Result<(), mintcache::paging::PagingError> {
//! let listings = PagingService::builder(
//!     Arc::new(MemoryProvider::new(64)),
//!     "listings",
//!     |collection: String| async move {
//!         Ok::<_, BoxError>(vec![format!("{collection}#1"), format!("{collection}#2")])
//!     },
//! )
//! .renew_after(Duration::from_secs(30))
//! .expire_after(Duration::from_secs(300))
//! .build()?;
//!
//! let first = listings.page("apes", "", 1).await?;
//! let second = listings.page("apes", &first.next, 1).await?;
//! assert!(!second.has_next());
//! # Ok(())
//! # }
//! ```

mod cursor;
mod error;
mod pool;
mod service;

pub use cursor::{Cursor, now_nanos};
pub use error::{BoxError, PagingError};
pub use pool::WorkerPool;
pub use service::{
    DEFAULT_PRODUCER_TIMEOUT, DEFAULT_SHARD_SIZE, Page, Paginate, PagingService,
    PagingServiceBuilder, Producer, RebuildOutcome,
};

pub(crate) use service::{
    METRIC_PAGING_LOCK_CONTENTION_TOTAL, METRIC_PAGING_PRODUCE_MS, METRIC_PAGING_REBUILD_TOTAL,
};

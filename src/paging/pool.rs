//! Bounded executor for snapshot shard writes.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

use crate::cache::CacheError;

/// Caps the number of shard writes in flight across every paging service that
/// shares it. Cloning shares the same permits.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub const DEFAULT_SIZE: usize = 256;

    /// A pool of `size` permits; zero is bumped to one.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Permits not currently held by a running job.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run every job to completion, at most `size` at a time.
    ///
    /// All jobs run even if some fail; the first failure observed is returned.
    /// Dropping the returned future aborts jobs that are still running.
    pub async fn run_all<I, Fut>(&self, jobs: I) -> Result<(), CacheError>
    where
        I: IntoIterator<Item = Fut>,
        Fut: Future<Output = Result<(), CacheError>> + Send + 'static,
    {
        let mut set = JoinSet::new();
        for job in jobs {
            let permits = Arc::clone(&self.permits);
            set.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|_| CacheError::provider("worker pool closed"))?;
                job.await
            });
        }

        let mut first_error = None;
        while let Some(joined) = set.join_next().await {
            let result = joined
                .map_err(|err| CacheError::provider(format!("worker task failed: {err}")))
                .and_then(|result| result);
            if let Err(err) = result {
                warn!(error = %err, "worker pool job failed");
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SIZE)
    }
}

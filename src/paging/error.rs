use std::time::Duration;

use thiserror::Error;

use crate::cache::CacheError;

/// Error type producers may return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum PagingError {
    /// The cursor is malformed, expired, or points at a snapshot that is gone.
    /// Clients recover by paging again from an empty cursor.
    #[error("bad cursor: {0}")]
    BadCursor(String),
    #[error("producer failed: {0}")]
    Producer(#[source] BoxError),
    #[error("producer timed out after {0:?}")]
    ProducerTimeout(Duration),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("invalid paging configuration: {0}")]
    InvalidConfig(String),
}

impl PagingError {
    pub fn bad_cursor(reason: impl Into<String>) -> Self {
        Self::BadCursor(reason.into())
    }

    pub fn is_bad_cursor(&self) -> bool {
        matches!(self, Self::BadCursor(_))
    }
}

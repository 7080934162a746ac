//! Opaque snapshot cursors.

use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use time::OffsetDateTime;

use super::error::PagingError;

/// Position inside a snapshot.
///
/// On the wire a cursor is `base64url_nopad("{created_ts}:{total}:{offset}")`
/// with `created_ts` in nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    created_ts: i64,
    total: usize,
    offset: usize,
}

impl Cursor {
    pub fn new(created_ts: i64, total: usize, offset: usize) -> Self {
        Self {
            created_ts,
            total,
            offset,
        }
    }

    pub fn created_ts(&self) -> i64 {
        self.created_ts
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Index of the next unread element.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of elements left after `offset`.
    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.offset)
    }

    /// Same snapshot, moved forward by `by` elements (capped at the end).
    pub fn advanced(&self, by: usize) -> Self {
        Self {
            offset: self.offset.saturating_add(by).min(self.total),
            ..*self
        }
    }

    /// Time elapsed since the snapshot was taken. Timestamps in the future
    /// (clock skew between hosts) count as zero.
    pub fn age(&self, now_ns: i64) -> Duration {
        u64::try_from(now_ns.saturating_sub(self.created_ts))
            .map(Duration::from_nanos)
            .unwrap_or(Duration::ZERO)
    }

    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(format!(
            "{}:{}:{}",
            self.created_ts, self.total, self.offset
        ))
    }

    /// Token handed to clients for the following page; empty once the
    /// snapshot is exhausted.
    pub fn next_token(&self) -> String {
        if self.offset < self.total {
            self.encode()
        } else {
            String::new()
        }
    }

    pub fn decode(token: &str) -> Result<Self, PagingError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|err| PagingError::bad_cursor(err.to_string()))?;
        let text = String::from_utf8(bytes)
            .map_err(|_| PagingError::bad_cursor("cursor is not valid UTF-8"))?;

        let mut parts = text.split(':');
        let (Some(created_ts), Some(total), Some(offset), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(PagingError::bad_cursor(format!(
                "expected three fields, got `{text}`"
            )));
        };

        let created_ts = created_ts
            .parse::<i64>()
            .map_err(|err| PagingError::bad_cursor(format!("timestamp: {err}")))?;
        let total = total
            .parse::<usize>()
            .map_err(|err| PagingError::bad_cursor(format!("total: {err}")))?;
        let offset = offset
            .parse::<usize>()
            .map_err(|err| PagingError::bad_cursor(format!("offset: {err}")))?;

        if offset > total {
            return Err(PagingError::bad_cursor(format!(
                "offset {offset} beyond total {total}"
            )));
        }

        Ok(Self::new(created_ts, total, offset))
    }
}

/// Wall clock in nanoseconds since the Unix epoch.
pub fn now_nanos() -> i64 {
    i64::try_from(OffsetDateTime::now_utc().unix_timestamp_nanos()).unwrap_or(i64::MAX)
}

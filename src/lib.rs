//! Layered caching for read-heavy marketplace endpoints.
//!
//! - [`cache`]: byte-level providers (in-process LRU, Redis) and their tiered
//!   composition, typed cache services, and an axum response-cache middleware.
//! - [`paging`]: cursor pagination over sharded, immutable snapshots of an
//!   expensive ordered query.
//! - [`config`] and [`infra`]: layered settings, tracing and metric setup, and
//!   Redis bootstrap.

pub mod cache;
pub mod config;
pub mod infra;
pub mod paging;

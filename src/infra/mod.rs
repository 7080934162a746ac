//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod redis;
pub mod stack;
pub mod telemetry;

pub use error::InfraError;
pub use stack::CacheStack;

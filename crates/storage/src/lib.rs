//! Primary Store and Cache Mirror backends.
//!
//! [`PgReviewStore`] implements [`savor_core::ReviewStore`] over PostgreSQL,
//! [`RedisStatCache`] implements [`savor_core::StatCache`] over Redis. With the
//! `test-utils` feature the crate also exposes in-memory fakes of both.

pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod postgres;
pub mod redis_cache;

pub use error::StorageError;
#[cfg(any(test, feature = "test-utils"))]
pub use memory::{MemoryReviewStore, MemoryStatCache};
pub use postgres::PgReviewStore;
pub use redis_cache::RedisStatCache;

use thiserror::Error;

use savor_core::SavorError;

/// Failures while bringing a backend up. Per-call failures are reported as
/// [`SavorError`] through the capability traits instead.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

pub(crate) fn store_err(e: sqlx::Error) -> SavorError {
    SavorError::Store(e.to_string())
}

pub(crate) fn cache_err(e: redis::RedisError) -> SavorError {
    SavorError::Cache(e.to_string())
}

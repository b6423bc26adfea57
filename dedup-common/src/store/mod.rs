//! The shared expiring key-value store every instance claims identifiers in.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("store is unavailable: {0}")]
    Unavailable(String),
    #[error("store operation timed out")]
    Timeout,
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error(transparent)]
    Redis(#[from] Arc<::redis::RedisError>),
}

impl From<::redis::RedisError> for StoreError {
    fn from(err: ::redis::RedisError) -> Self {
        if err.is_timeout() {
            StoreError::Timeout
        } else {
            StoreError::Redis(Arc::new(err))
        }
    }
}

/// The handful of store primitives the deduplication pipeline relies on.
///
/// Implementations must make `set_if_absent` atomic: of any number of concurrent
/// callers, across processes, at most one may observe `true` for a live key.
#[async_trait]
pub trait DedupStore {
    /// Create `key` with the given time to live if it does not exist.
    /// Returns true if this call created it.
    async fn set_if_absent(&self, key: String, ttl: Duration) -> Result<bool, StoreError>;

    /// All live keys starting with `prefix`, without duplicates.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Delete the given keys, returning how many existed.
    async fn delete(&self, keys: Vec<String>) -> Result<u64, StoreError>;
}

//! Counter store contract and its implementations.
//!
//! The admission engine never talks to a backend directly. It is handed a
//! [`CounterStore`] and relies on it for every piece of shared state: the
//! per-key window counter and the per-key block marker.

mod memory;
mod redis_store;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::MemoryStore;
pub use self::redis_store::{RedisStore, RedisStoreConfig};

/// Errors returned by counter store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Store has been closed")]
    Closed,
}

/// Keyed counter storage consumed by the admission engine.
///
/// Implementations must be safe to share across concurrent evaluations
/// without external locking. `increment` must be atomic: two concurrent
/// callers on the same key observe distinct, sequential counts.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the counter for `key`, creating it at 1 if absent.
    ///
    /// Returns the post-increment count.
    async fn increment(&self, key: &str) -> Result<u64, StoreError>;

    /// Current counter value for `key`, or 0 if absent or expired.
    async fn current_count(&self, key: &str) -> Result<u64, StoreError>;

    /// Install or refresh the TTL of the counter for `key`.
    async fn set_expiration(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Whether a live block marker exists for `key`.
    async fn is_blocked(&self, key: &str) -> Result<bool, StoreError>;

    /// Install a block marker for `key` with the given TTL, replacing any prior one.
    async fn block(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Force the counter for `key` back to absent.
    async fn reset(&self, key: &str) -> Result<(), StoreError>;

    /// Release underlying resources.
    async fn close(&self) -> Result<(), StoreError>;
}

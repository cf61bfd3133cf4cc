//! Redis-backed counter store.
//!
//! Lets several service instances share admission state. Each identity key
//! maps to two Redis keys:
//! - `<prefix><key>`: the window counter, driven by `INCR`, `PEXPIRE` and `DEL`
//! - `<prefix>block:<key>`: the block marker, written with `SET ... PX`
//!
//! Redis performs TTL expiry itself, so no sweeping happens on this side.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::{debug, info};

use super::{CounterStore, StoreError};

/// Configuration for [`RedisStore`].
#[derive(Debug, Clone, Default)]
pub struct RedisStoreConfig {
    /// Prefix prepended to every Redis key (default: empty)
    pub key_prefix: String,
}

/// [`CounterStore`] backed by a Redis server.
///
/// The underlying [`ConnectionManager`] multiplexes one connection and
/// reconnects on failure; it is cheap to clone per command. After
/// [`CounterStore::close`] every operation fails with [`StoreError::Closed`].
pub struct RedisStore {
    connection: Mutex<Option<ConnectionManager>>,
    config: RedisStoreConfig,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn counter_key(prefix: &str, key: &str) -> String {
    format!("{}{}", prefix, key)
}

fn block_key(prefix: &str, key: &str) -> String {
    format!("{}block:{}", prefix, key)
}

/// TTL in milliseconds, clamped to the largest value Redis accepts.
fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis())
        .unwrap_or(u64::MAX)
        .min(i64::MAX as u64)
}

impl RedisStore {
    /// Connect to Redis with custom configuration.
    ///
    /// # Errors
    /// Returns error if the URL is invalid or the server does not answer `PING`.
    pub async fn connect_with_config(
        url: &str,
        config: RedisStoreConfig,
    ) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        let mut connection = ConnectionManager::new(client).await?;

        let _: String = redis::cmd("PING").query_async(&mut connection).await?;
        info!(key_prefix = %config.key_prefix, "Connected to Redis counter store");

        Ok(Self {
            connection: Mutex::new(Some(connection)),
            config,
        })
    }

    fn connection(&self) -> Result<ConnectionManager, StoreError> {
        self.connection.lock().clone().ok_or(StoreError::Closed)
    }

    fn counter_key(&self, key: &str) -> String {
        counter_key(&self.config.key_prefix, key)
    }

    fn block_key(&self, key: &str) -> String {
        block_key(&self.config.key_prefix, key)
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection()?;
        let count: u64 = conn.incr(self.counter_key(key), 1u64).await?;
        Ok(count)
    }

    async fn current_count(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection()?;
        let count: Option<u64> = conn.get(self.counter_key(key)).await?;
        Ok(count.unwrap_or(0))
    }

    async fn set_expiration(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        let _: () = redis::cmd("PEXPIRE")
            .arg(self.counter_key(key))
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn is_blocked(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection()?;
        let exists: bool = conn.exists(self.block_key(key)).await?;
        Ok(exists)
    }

    async fn block(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        let block_key = self.block_key(key);
        let ttl_ms = millis(ttl);

        // Redis rejects `PX 0`; a zero-length block just clears any prior marker.
        if ttl_ms == 0 {
            let _: () = conn.del(block_key).await?;
            return Ok(());
        }

        let _: () = redis::cmd("SET")
            .arg(block_key)
            .arg(1)
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        let _: () = conn.del(self.counter_key(key)).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        // In-flight commands keep their own clone; the socket closes once they finish.
        if self.connection.lock().take().is_some() {
            debug!("Redis counter store closed");
        }
        Ok(())
    }
}

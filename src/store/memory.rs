//! In-process counter store.
//!
//! Counters and block markers live in [`DashMap`]s keyed by identity key.
//! Each entry carries an optional deadline on the tokio clock; an entry
//! whose deadline has passed is treated as absent by every operation, and an
//! optional background sweeper removes such entries so the maps do not grow
//! without bound.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

use super::{CounterStore, StoreError};

/// A window counter and its optional expiration deadline.
#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    count: u64,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        !is_live(self.expires_at, now)
    }
}

/// `None` means the entry never expires.
fn is_live(deadline: Option<Instant>, now: Instant) -> bool {
    deadline.map_or(true, |deadline| deadline > now)
}

fn deadline_after(now: Instant, ttl: Duration) -> Option<Instant> {
    now.checked_add(ttl)
}

#[derive(Debug, Default)]
struct Shared {
    counters: DashMap<String, Slot>,
    blocks: DashMap<String, Option<Instant>>,
    closed: AtomicBool,
}

impl Shared {
    /// Drop every expired counter and block marker. Returns how many were removed.
    fn sweep(&self, now: Instant) -> usize {
        let before = self.counters.len() + self.blocks.len();
        self.counters.retain(|_, slot| !slot.is_expired(now));
        self.blocks.retain(|_, deadline| is_live(*deadline, now));
        before.saturating_sub(self.counters.len() + self.blocks.len())
    }
}

/// Thread-safe in-memory [`CounterStore`].
///
/// Suitable for single-instance deployments and tests. All state is lost
/// when the store is closed or dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryStore {
    /// Create an empty store without a background sweeper.
    ///
    /// Expired entries are still ignored on access; they are only reclaimed
    /// when overwritten or by an explicit [`MemoryStore::sweep_expired`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that reclaims expired entries every `interval`.
    ///
    /// Must be called from within a tokio runtime. A zero interval disables
    /// the sweeper.
    pub fn with_sweeper(interval: Duration) -> Self {
        let store = Self::new();
        if interval.is_zero() {
            return store;
        }

        let shared = Arc::clone(&store.shared);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = shared.sweep(Instant::now());
                if removed > 0 {
                    trace!(removed = removed, "Swept expired entries");
                }
            }
        });
        *store.sweeper.lock() = Some(handle);

        debug!(interval_ms = interval.as_millis() as u64, "Memory store sweeper started");
        store
    }

    /// Remove expired entries now. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        self.shared.sweep(Instant::now())
    }

    /// Number of counters currently held, expired or not.
    pub fn counter_count(&self) -> usize {
        self.shared.counters.len()
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn stop_sweeper(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(&self, key: &str) -> Result<u64, StoreError> {
        self.ensure_open()?;
        let now = Instant::now();

        // The entry guard holds the shard lock, so read-modify-write is atomic per key.
        let mut slot = self.shared.counters.entry(key.to_string()).or_default();
        if slot.is_expired(now) {
            *slot = Slot::default();
        }
        slot.count += 1;
        Ok(slot.count)
    }

    async fn current_count(&self, key: &str) -> Result<u64, StoreError> {
        self.ensure_open()?;
        let now = Instant::now();

        Ok(self
            .shared
            .counters
            .get(key)
            .filter(|slot| !slot.is_expired(now))
            .map(|slot| slot.count)
            .unwrap_or(0))
    }

    async fn set_expiration(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        self.ensure_open()?;
        let now = Instant::now();

        // Like Redis EXPIRE, this is a no-op for a key that does not exist.
        if let Some(mut slot) = self.shared.counters.get_mut(key) {
            if !slot.is_expired(now) {
                slot.expires_at = deadline_after(now, ttl);
            }
        }
        Ok(())
    }

    async fn is_blocked(&self, key: &str) -> Result<bool, StoreError> {
        self.ensure_open()?;
        let now = Instant::now();

        Ok(self
            .shared
            .blocks
            .get(key)
            .map(|deadline| is_live(*deadline, now))
            .unwrap_or(false))
    }

    async fn block(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        self.ensure_open()?;
        let now = Instant::now();

        self.shared
            .blocks
            .insert(key.to_string(), deadline_after(now, ttl));
        Ok(())
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.shared.counters.remove(key);
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.stop_sweeper();
        self.shared.counters.clear();
        self.shared.blocks.clear();
        debug!("Memory store closed");
        Ok(())
    }
}

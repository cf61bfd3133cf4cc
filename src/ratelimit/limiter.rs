//! Core admission engine.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, trace};

use super::key::IdentityKey;
use super::policy::{LimitPolicy, PolicySet};
use super::verdict::{instant_after, Verdict};
use crate::error::{Result, StoreOperation, WardenError};
use crate::store::CounterStore;

/// Length of a counting window, measured from its first request.
pub const WINDOW: Duration = Duration::from_secs(1);

/// Fixed-window admission engine.
///
/// The engine holds no mutable state of its own. Every evaluation reads and
/// mutates the injected [`CounterStore`], which serializes concurrent access
/// to a key. Share it across tasks behind an [`Arc`].
pub struct AdmissionEngine<S: CounterStore + ?Sized> {
    store: Arc<S>,
    policies: PolicySet,
}

impl<S: CounterStore + ?Sized> AdmissionEngine<S> {
    /// Create an engine enforcing `policies` against `store`.
    pub fn new(store: Arc<S>, policies: PolicySet) -> Self {
        Self { store, policies }
    }

    /// The policies this engine enforces.
    pub fn policies(&self) -> &PolicySet {
        &self.policies
    }

    /// The counter store backing this engine.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Decide whether a request from `address`, optionally carrying `token`,
    /// may proceed.
    ///
    /// A non-empty token present in the token policies is limited under
    /// `token:<token>`; anything else is limited under `ip:<address>` with
    /// the default policy. The address is not validated.
    ///
    /// # Errors
    /// Returns [`WardenError::Store`] if any counter store call fails. A store
    /// failure is never turned into an allow or deny verdict.
    pub async fn evaluate(&self, address: &str, token: &str) -> Result<Verdict> {
        let (key, policy) = self.policies.select(address, token);
        self.check_limit(&key, policy).await
    }

    /// Run the fixed-window check for one key.
    ///
    /// Steps run strictly in order: block check, increment, expiration on
    /// window open, block and reset on breach, verdict.
    async fn check_limit(&self, key: &IdentityKey, policy: &LimitPolicy) -> Result<Verdict> {
        let store_key = key.as_str();
        let limit = policy.requests_per_window;
        let block_duration = policy.block_duration;

        trace!(key = %key, limit = limit, "Checking admission");

        let blocked = self
            .store
            .is_blocked(store_key)
            .await
            .map_err(|e| WardenError::store(StoreOperation::IsBlocked, store_key, e))?;

        // The reported reset is relative to now, not to when the block began.
        if blocked {
            trace!(key = %key, "Key is blocked");
            return Ok(Verdict::deny(instant_after(Utc::now(), block_duration)));
        }

        let count = self
            .store
            .increment(store_key)
            .await
            .map_err(|e| WardenError::store(StoreOperation::Increment, store_key, e))?;

        if count == 1 {
            self.store
                .set_expiration(store_key, WINDOW)
                .await
                .map_err(|e| WardenError::store(StoreOperation::SetExpiration, store_key, e))?;
            trace!(key = %key, "Opened new window");
        }

        if count > limit {
            self.store
                .block(store_key, block_duration)
                .await
                .map_err(|e| WardenError::store(StoreOperation::Block, store_key, e))?;

            // Not atomic with the block above; a concurrent reader may briefly
            // see the breached count before this reset lands.
            self.store
                .reset(store_key)
                .await
                .map_err(|e| WardenError::store(StoreOperation::Reset, store_key, e))?;

            debug!(
                key = %key,
                count = count,
                limit = limit,
                block_secs = block_duration.as_secs(),
                "Rate limit exceeded, key blocked"
            );
            return Ok(Verdict::deny(instant_after(Utc::now(), block_duration)));
        }

        Ok(Verdict::allow(limit - count, instant_after(Utc::now(), WINDOW)))
    }
}

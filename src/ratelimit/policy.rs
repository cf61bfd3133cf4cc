//! Limit policies and policy selection.
//!
//! A [`PolicySet`] holds one default policy applied per caller address and
//! any number of token-specific policies. A recognized token always takes
//! precedence over the address policy, even when its limit is stricter.

use std::collections::HashMap;
use std::time::Duration;

use tracing::warn;

use super::key::IdentityKey;

/// Requests allowed per one-second window and how long to block on breach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitPolicy {
    /// Requests allowed in a single window
    pub requests_per_window: u64,
    /// How long a key stays blocked after exceeding the limit
    pub block_duration: Duration,
}

impl LimitPolicy {
    pub fn new(requests_per_window: u64, block_duration: Duration) -> Self {
        Self {
            requests_per_window,
            block_duration,
        }
    }

    /// Convenience constructor with the block duration in whole seconds.
    pub fn per_second(requests_per_window: u64, block_secs: u64) -> Self {
        Self::new(requests_per_window, Duration::from_secs(block_secs))
    }
}

/// The full set of policies an engine enforces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySet {
    /// Applied to callers without a recognized token
    pub ip: LimitPolicy,
    /// Token value -> policy
    pub tokens: HashMap<String, LimitPolicy>,
}

impl PolicySet {
    /// Create a policy set with only the default address policy.
    pub fn new(ip: LimitPolicy) -> Self {
        Self {
            ip,
            tokens: HashMap::new(),
        }
    }

    /// Add or replace a token-specific policy.
    pub fn with_token(mut self, token: impl Into<String>, policy: LimitPolicy) -> Self {
        self.tokens.insert(token.into(), policy);
        self
    }

    /// Resolve the identity key and policy governing a request.
    ///
    /// An empty token, or one not present in the token map, falls back to the
    /// address policy keyed by `address`.
    pub fn select(&self, address: &str, token: &str) -> (IdentityKey, &LimitPolicy) {
        if !token.is_empty() {
            if let Some(policy) = self.tokens.get(token) {
                return (IdentityKey::token(token), policy);
            }
        }
        (IdentityKey::ip(address), &self.ip)
    }
}

/// Parse a compact token list of the form `token:rps:block_secs,...`.
///
/// Whitespace around entries is ignored. Entries that do not have exactly
/// three fields or whose numbers do not parse are skipped with a warning.
/// A later entry for the same token replaces an earlier one.
pub fn parse_token_list(list: &str) -> HashMap<String, LimitPolicy> {
    let mut policies = HashMap::new();

    for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let parts: Vec<&str> = entry.split(':').collect();
        let [token, rps, block] = parts.as_slice() else {
            warn!(entry = %entry, "Skipping token limit entry: expected token:rps:block_secs");
            continue;
        };

        let (Ok(rps), Ok(block)) = (rps.parse::<u64>(), block.parse::<u64>()) else {
            warn!(entry = %entry, "Skipping token limit entry: rps and block_secs must be integers");
            continue;
        };

        policies.insert(token.to_string(), LimitPolicy::per_second(rps, block));
    }

    policies
}

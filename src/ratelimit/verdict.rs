//! Admission verdicts.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Message carried by every deny verdict, whether the key was already
/// blocked or has just exceeded its limit.
pub const LIMIT_EXCEEDED_MESSAGE: &str =
    "you have reached the maximum number of requests or actions allowed within a certain time frame";

/// The outcome of one admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Requests left in the current window; always 0 when denied
    pub remaining: u64,
    /// When the caller may expect the window or block to reset
    pub reset_at: DateTime<Utc>,
    /// Empty when allowed
    pub message: String,
}

impl Verdict {
    pub(crate) fn allow(remaining: u64, reset_at: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            remaining,
            reset_at,
            message: String::new(),
        }
    }

    pub(crate) fn deny(reset_at: DateTime<Utc>) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            reset_at,
            message: LIMIT_EXCEEDED_MESSAGE.to_string(),
        }
    }

    /// Whole seconds from `now` until `reset_at`, rounded up. Never negative.
    pub fn seconds_until_reset(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.reset_at - now).num_milliseconds();
        if millis <= 0 {
            return 0;
        }
        (millis as u64).div_ceil(1000)
    }
}

/// `now + span`, saturating at the largest representable timestamp.
pub(crate) fn instant_after(now: DateTime<Utc>, span: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(span)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

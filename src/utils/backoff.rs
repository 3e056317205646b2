//! Exponential backoff for retried HTTP reads.

use crate::constants::{HTTP_BACKOFF_CAP, HTTP_BACKOFF_START};
use std::time::Duration;

/// Delay before retry number `attempt` (0-based): doubling from the
/// starting delay, capped.
#[must_use]
pub fn delay_for_attempt(attempt: u32) -> Duration {
    let start = HTTP_BACKOFF_START.as_millis() as u64;
    let cap = HTTP_BACKOFF_CAP.as_millis() as u64;
    let delay = start.saturating_mul(1u64 << attempt.min(16));
    Duration::from_millis(delay.min(cap))
}

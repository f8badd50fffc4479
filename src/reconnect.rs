//! Exponential backoff for channel reconnects
//!
//! `delay = min(base * 2^attempt, max)`. The attempt counter lives in the
//! health record and is reset only by a successful subscribe.

use crate::config::RealtimeConfig;
use std::time::Duration;

/// Highest exponent applied; `2^63` still fits in a `u64`
const MAX_EXPONENT: u32 = 63;

/// Outcome of asking for another retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Arm a timer for this delay
    Retry { delay: Duration, attempt: u32 },
    /// Retries used up; escalate
    Exhausted,
}

/// Backoff delay for the given zero-based attempt
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let base_ms = base.as_millis().min(u64::MAX as u128) as u64;
    let factor = 2u64.saturating_pow(attempt.min(MAX_EXPONENT));
    let delay_ms = base_ms.saturating_mul(factor);
    Duration::from_millis(delay_ms).min(max)
}

/// Decide whether to retry after `attempts` previous attempts
pub fn next_retry(attempts: u32, config: &RealtimeConfig) -> RetryDecision {
    if attempts >= config.max_retries {
        return RetryDecision::Exhausted;
    }
    RetryDecision::Retry {
        delay: backoff_delay(attempts, config.base_retry_delay(), config.max_retry_delay()),
        attempt: attempts + 1,
    }
}

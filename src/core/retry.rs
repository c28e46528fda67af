//! Retry cap and exponential backoff.

use std::time::Duration;

use super::message::QueuedMessage;

const DEFAULT_BASE_DELAY_MS: u64 = 30_000;
const DEFAULT_MAX_DELAY_MS: u64 = 300_000;

/// Decides whether a failed message may go back to pending, and when.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// `None` means unbounded
    pub max_retries: Option<u32>,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// No retry cap, 30s base delay doubling up to 5 minutes.
    pub fn unbounded() -> Self {
        Self {
            max_retries: None,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay = base;
        self.max_delay = max;
        self
    }

    /// Whether a message with `retry_count` retries behind it may be retried again.
    pub fn allows_retry(&self, retry_count: u32) -> bool {
        self.max_retries.map_or(true, |max| retry_count < max)
    }

    /// Backoff before the next automatic retry.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Whether an automatic retry is due at `now_ms`.
    pub fn is_ready(&self, message: &QueuedMessage, now_ms: i64) -> bool {
        if !self.allows_retry(message.retry_count) {
            return false;
        }

        let Some(last_attempt) = message.last_attempt_at else {
            return true;
        };

        let elapsed = now_ms.saturating_sub(last_attempt).max(0) as u128;
        elapsed >= self.delay_for(message.retry_count).as_millis()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded()
    }
}

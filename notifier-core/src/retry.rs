use chrono::Duration;

/// Failures after which a notification stays FAILED for good.
pub const MAX_RETRIES: i32 = 3;

/// Backoff schedule for failed channel deliveries.
///
/// The n-th failure (1-based) waits `base_delay * 2^(n-1)`: one, two, then
/// four minutes with the defaults. Once `retry_count` reaches `max_retries`
/// no further attempt is scheduled.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: i32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            base_delay: Duration::minutes(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt after the given (already incremented) failure count.
    pub fn delay_for(&self, retry_count: i32) -> Duration {
        let exponent = (retry_count.max(1) - 1).min(16) as u32;
        self.base_delay * 2_i32.pow(exponent)
    }

    pub fn should_retry(&self, retry_count: i32) -> bool {
        retry_count < self.max_retries
    }
}

use std::time::Duration;

use rand::Rng;

/// Full-jitter exponential backoff for chunk retries.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 250,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryConfig {
    pub const fn can_retry(&self, attempt: usize) -> bool {
        attempt + 1 < self.max_attempts
    }

    /// Delay before the given attempt (0 = first, no delay).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(0);
        }
        let exponential = self
            .base_delay_ms
            .saturating_mul(1u64 << (attempt - 1).min(20));
        let capped = exponential.min(self.max_delay_ms);
        let jittered = if capped > 0 {
            rand::thread_rng().gen_range(0..=capped)
        } else {
            0
        };
        Duration::from_millis(jittered)
    }
}

/// Transient upstream conditions worth another attempt: connect
/// failures, timeouts, 5xx, and 429.
pub fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
}

/// Parse a Retry-After header value (seconds form only).
pub fn retry_after_secs(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

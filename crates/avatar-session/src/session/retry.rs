//! Caller-side retry policy for starting a session
//!
//! The controller itself never retries; `start_with_retry` applies this
//! policy to failures that are worth a retry (`Error::is_retryable`).

use rand::Rng;
use std::time::Duration;

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt (default: 3)
    pub max_retries: u32,
    /// Initial backoff delay in milliseconds (default: 1000ms)
    pub backoff_initial_ms: u64,
    /// Maximum backoff delay in milliseconds (default: 10000ms)
    pub backoff_max_ms: u64,
    /// Backoff multiplier (default: 2.0)
    pub backoff_multiplier: f64,
    /// Whether to add jitter to backoff (default: true)
    pub jitter_enabled: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_initial_ms: 1000,
            backoff_max_ms: 10000,
            backoff_multiplier: 2.0,
            jitter_enabled: true,
        }
    }
}

impl RetryPolicy {
    /// Never retry
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Calculate backoff duration for a given attempt number
    ///
    /// # Arguments
    /// * `attempt` - Current retry number (0-indexed)
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let backoff_ms =
            (self.backoff_initial_ms as f64) * self.backoff_multiplier.powi(attempt as i32);
        let backoff_ms = backoff_ms.min(self.backoff_max_ms as f64);

        // Add jitter (0-25% of backoff)
        let final_ms = if self.jitter_enabled && backoff_ms > 0.0 {
            backoff_ms + rand::thread_rng().gen_range(0.0..=backoff_ms * 0.25)
        } else {
            backoff_ms
        };

        Duration::from_millis(final_ms as u64)
    }

    /// Check if more retries are allowed
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

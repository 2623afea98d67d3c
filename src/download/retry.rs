//! Exponential backoff with jitter

use crate::config::CrawlConfig;
use rand::Rng;
use std::time::Duration;

/// Attempt budget and delay schedule shared by page fetches and downloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Policy for the download workers
    pub fn for_downloads(config: &CrawlConfig) -> Self {
        Self::new(
            config.download_max_attempts,
            Duration::from_millis(config.download_backoff_base_ms),
            Duration::from_millis(config.download_backoff_max_ms),
        )
    }

    /// Policy for page fetches: one attempt plus `fetch_retries`
    pub fn for_fetches(config: &CrawlConfig) -> Self {
        Self::new(
            config.fetch_retries.saturating_add(1),
            Duration::from_millis(config.download_backoff_base_ms),
            Duration::from_millis(config.download_backoff_max_ms),
        )
    }

    /// True if another attempt is allowed after `attempt` (1-based) failed
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Capped exponential delay before retrying after `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let base_ms = self.base_delay.as_millis() as u64;
        let delay_ms = base_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay_ms).min(self.max_delay)
    }

    /// Backoff with "equal jitter": uniformly within the upper half of the delay
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let capped = self.backoff(attempt).as_millis() as u64;
        if capped == 0 {
            return Duration::ZERO;
        }
        let half = capped / 2;
        Duration::from_millis(half + rand::rng().random_range(0..=capped - half))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500), Duration::from_secs(30))
    }
}

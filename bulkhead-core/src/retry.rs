//! Retry helpers with exponential backoff and jitter.
//!
//! Used by accept loops and other retryable paths to space out repeated
//! attempts after transient failures. Delays double on every attempt up to a
//! configurable cap, with random jitter applied so independent retriers do
//! not synchronize.

use std::time::Duration;

use rand::Rng;

/// Backoff state tracker for a retried operation.
///
/// Tracks the attempt count and produces the delay before each retry. Once
/// `max_attempts` consecutive failures have been recorded, [`next_delay`]
/// returns `None` and the caller should give up.
///
/// [`next_delay`]: RetryBackoff::next_delay
#[derive(Debug, Clone)]
pub struct RetryBackoff {
    /// Delay before the first retry.
    base_delay: Duration,
    /// Upper bound on the delay between retries.
    max_delay: Duration,
    /// Consecutive failures allowed before giving up.
    max_attempts: u32,
    /// Current attempt number (0 = no failures recorded).
    attempt: u32,
    /// Delay the next retry will use, pre-jitter.
    current_delay: Duration,
}

impl RetryBackoff {
    /// Create a backoff tracker.
    #[must_use]
    pub const fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
            attempt: 0,
            current_delay: base_delay,
        }
    }

    /// Record a failure and return the delay before the next attempt.
    ///
    /// Returns `None` when the attempt budget is exhausted. The returned
    /// delay is jittered within ±50% of the nominal backoff value.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }

        let delay = self.current_delay;

        self.attempt += 1;
        self.current_delay = self
            .base_delay
            .saturating_mul(1_u32 << self.attempt.min(10));
        if self.current_delay > self.max_delay {
            self.current_delay = self.max_delay;
        }

        Some(jitter(delay))
    }

    /// Reset the tracker after a successful attempt.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current_delay = self.base_delay;
    }

    /// Number of consecutive failures recorded so far.
    #[inline]
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay the next retry will use before jitter is applied.
    #[inline]
    #[must_use]
    pub const fn current_delay(&self) -> Duration {
        self.current_delay
    }
}

/// Apply ±50% random jitter to a delay.
fn jitter(delay: Duration) -> Duration {
    let millis = delay.as_millis() as u64;
    if millis == 0 {
        return delay;
    }
    let low = millis / 2;
    let high = millis + millis / 2;
    Duration::from_millis(rand::thread_rng().gen_range(low..=high))
}

//! Bounded exponential backoff for transient fetch failures.
//!
//! # Backoff Strategy
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
//! ```
//!
//! A `Retry-After` hint from the server replaces the computed delay, capped
//! at `max_delay`.

use std::time::Duration;

use rand::{Rng, rng};

use super::FetchError;

const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
const MAX_JITTER_MS: u64 = 250;

/// How many times, and how patiently, a failed request is retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt. Zero disables retrying.
    max_retries: u32,
    /// Delay before the first retry; doubles each attempt.
    base_delay: Duration,
    /// Cap applied before jitter.
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2)
    }
}

impl RetryPolicy {
    /// Creates a policy with the given retry budget and default delays.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(0)
    }

    /// Overrides the base and maximum delays.
    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Returns the retry budget.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Decides whether the attempt that just failed should be retried.
    ///
    /// `attempt` is 1-indexed: the initial request is attempt 1. Returns the
    /// delay to wait before the next attempt, or `None` to give up.
    pub fn next_delay(&self, error: &FetchError, attempt: u32) -> Option<Duration> {
        if !error.is_transient() || attempt > self.max_retries {
            return None;
        }
        if let Some(hint) = error.retry_after() {
            return Some(hint.min(self.max_delay));
        }
        let jitter = Duration::from_millis(rng().random_range(0..=MAX_JITTER_MS));
        Some(self.backoff(attempt) + jitter)
    }

    /// Exponential delay for `attempt` before jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// Parses an integer-seconds `Retry-After` value.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

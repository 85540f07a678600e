//! Retry policy for failed job attempts.
//!
//! Implements exponential backoff with configurable parameters.

use crate::config::WorkerSettings;
use crate::model::Timestamp;

/// Retry policy implementing exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts (claims) allowed before a retryable failure becomes terminal.
    pub max_attempts: u32,
    /// Backoff after the first failed attempt, in seconds.
    pub initial_backoff_secs: u64,
    /// Cap for exponential growth, in seconds.
    pub max_backoff_secs: u64,
    /// Multiplier applied to backoff after each attempt.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn new(settings: &WorkerSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            initial_backoff_secs: settings.initial_backoff_secs,
            max_backoff_secs: settings.max_backoff_secs,
            backoff_multiplier: settings.backoff_multiplier,
        }
    }

    /// Whether a job that has been claimed `attempts` times may run again.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// `initial * multiplier^(attempts - 1)`, capped at `max_backoff_secs`.
    pub fn backoff_secs(&self, attempts: u32) -> u64 {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let backoff = self.initial_backoff_secs as f64 * self.backoff_multiplier.powi(exponent);
        backoff.min(self.max_backoff_secs as f64) as u64
    }

    /// Timestamp before which the job must not be claimed again.
    pub fn next_attempt_at(&self, now: Timestamp, attempts: u32) -> Timestamp {
        now + self.backoff_secs(attempts) as i64
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&WorkerSettings::default())
    }
}

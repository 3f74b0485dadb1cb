use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::context::Deadline;

/// Bounded retry with linear backoff.
///
/// Only the remote lookup is retried; store operations run once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, runs out
    /// of attempts, or the deadline leaves no room for the next backoff.
    ///
    /// Returns the last result together with the number of attempts made.
    pub fn run<T, E, F, R>(&self, deadline: &Deadline, mut op: F, retryable: R) -> (Result<T, E>, u32)
    where
        F: FnMut(u32) -> Result<T, E>,
        R: Fn(&E) -> bool,
    {
        let mut attempt = 1u32;
        loop {
            let result = op(attempt);
            let err = match result {
                Ok(value) => return (Ok(value), attempt),
                Err(err) => err,
            };
            if attempt >= self.max_attempts || !retryable(&err) {
                return (Err(err), attempt);
            }
            let delay = self.delay_for(attempt);
            if deadline.is_cancelled() || deadline.remaining().is_some_and(|left| left <= delay) {
                return (Err(err), attempt);
            }
            debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying after transient failure");
            thread::sleep(delay);
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(200))
    }
}

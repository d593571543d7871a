//! Bounded retry with a fixed delay between attempts.
//!
//! Used where the host offers no completion signal: deleting a tap the
//! launcher may still hold open, and waiting for a CPU to read back as
//! offline. Exhausting the budget yields [`GaveUp`] so callers can decide
//! whether to log or escalate.

use std::thread;
use std::time::Duration;

use thiserror::Error;

/// Maximum attempts and the pause between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// Builds a policy. A zero attempt budget still makes one attempt.
    #[must_use]
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        let max_attempts = if max_attempts == 0 { 1 } else { max_attempts };
        Self {
            max_attempts,
            delay,
        }
    }

    /// Attempt budget.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Pause between attempts.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// Runs `op` until it succeeds or the budget is spent.
    ///
    /// `op` receives the 1-based attempt number. No delay follows the final
    /// attempt.
    ///
    /// # Errors
    ///
    /// Returns [`GaveUp`] carrying the last error once every attempt failed.
    pub fn run<T, E>(&self, mut op: impl FnMut(u32) -> Result<T, E>) -> Result<T, GaveUp<E>> {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(last_error) if attempt >= self.max_attempts => {
                    return Err(GaveUp {
                        attempts: attempt,
                        last_error,
                    });
                }
                Err(_) => {
                    thread::sleep(self.delay);
                    attempt += 1;
                }
            }
        }
    }
}

/// Every attempt allowed by a [`RetryPolicy`] failed.
#[derive(Debug, Error)]
#[error("gave up after {attempts} attempts: {last_error}")]
pub struct GaveUp<E> {
    /// Attempts made.
    pub attempts: u32,
    /// Error from the final attempt.
    #[source]
    pub last_error: E,
}

//! Fixed-delay retry policy for transient failures.
//!
//! Pool open/close and per-range copy execution are all wrapped in the same
//! policy: a bounded number of attempts with a fixed pause between them.
//! Modeled as an explicit value rather than an attribute so the semantics
//! stay visible at every call site and testable on their own.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Retry an async operation a fixed number of times with a fixed delay.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Run `operation`, retrying on failure until the attempt budget is
    /// spent, then return the last error.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts => {
                    log::warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        label,
                        attempt,
                        self.max_attempts,
                        err,
                        self.delay
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    log::error!(
                        "{} failed after {} attempts: {}",
                        label,
                        self.max_attempts,
                        err
                    );
                    return Err(err);
                }
            }
        }
    }
}

//! Bounded retry with exponential backoff.

use std::future::Future;
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use thiserror::Error;
use tracing::{info, warn};

use crate::ConfigError;

/// Final failure after every attempt was used.
#[derive(Debug, Error)]
#[error("failed after {attempts} attempt(s): {error}")]
pub struct RetryExhausted<E: std::fmt::Display> {
    pub attempts: u32,
    pub error: E,
}

/// Retries a fallible operation, doubling the wait after each failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Result<Self, ConfigError> {
        if max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        Ok(Self {
            max_attempts,
            initial_backoff,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    /// Deterministic backoff: no jitter, multiplier 2, no elapsed-time cap.
    fn backoff(&self) -> ExponentialBackoff {
        let doublings = self.max_attempts.saturating_sub(1).min(31);
        let mut backoff = ExponentialBackoff {
            initial_interval: self.initial_backoff,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: self.initial_backoff.saturating_mul(1 << doublings),
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.reset();
        backoff
    }

    /// Waits between consecutive attempts: `initial * 2^(n-1)` for n in 1..max_attempts.
    pub fn delays(&self) -> Vec<Duration> {
        let mut backoff = self.backoff();
        (1..self.max_attempts)
            .map(|_| next_delay(&mut backoff))
            .collect()
    }

    /// Run `op` until it succeeds or `max_attempts` is reached.
    ///
    /// `op` receives the 1-based attempt number. A success on any attempt
    /// returns immediately. The last error is returned with the attempt count.
    pub async fn run<T, E, F, Fut>(
        &self,
        label: &str,
        mut op: F,
    ) -> Result<(T, u32), RetryExhausted<E>>
    where
        E: std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut backoff = self.backoff();
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(label, attempt, "succeeded after retry");
                    }
                    return Ok((value, attempt));
                }
                Err(error) if attempt < self.max_attempts => {
                    let wait = next_delay(&mut backoff);
                    warn!(
                        label,
                        attempt,
                        max_attempts = self.max_attempts,
                        retry_in_secs = wait.as_secs_f64(),
                        error = %error,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(error) => {
                    warn!(label, attempt, error = %error, "all attempts failed");
                    return Err(RetryExhausted {
                        attempts: attempt,
                        error,
                    });
                }
            }
        }
    }
}

/// Zero randomization still leaves sub-nanosecond float noise; keep whole milliseconds.
fn next_delay(backoff: &mut ExponentialBackoff) -> Duration {
    let delay = backoff.next_backoff().unwrap_or(backoff.max_interval);
    Duration::from_millis(delay.as_millis() as u64)
}

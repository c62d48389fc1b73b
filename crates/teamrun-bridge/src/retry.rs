//! Bounded retry with jittered backoff for a single outbound call.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

/// Retry policy for one outbound operation.
///
/// Stateless across calls: every `execute` starts its own attempt counter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,

    /// Nominal delay between attempts.
    pub base_delay: Duration,

    /// Each delay is `base_delay * (1 ± jitter_ratio)`.
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            jitter_ratio: 0.2,
        }
    }
}

impl RetryPolicy {
    /// A policy that runs the operation exactly once.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Run `operation`, retrying every failure.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.execute_if(operation, |_| true).await
    }

    /// Run `operation`, retrying failures for which `is_retryable` holds.
    ///
    /// The last error is returned unchanged.
    pub async fn execute_if<T, E, F, Fut, P>(
        &self,
        mut operation: F,
        is_retryable: P,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        P: Fn(&E) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if attempt < max_attempts && is_retryable(&error) => {
                    let delay = self.jittered_delay();
                    debug!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying outbound call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn jittered_delay(&self) -> Duration {
        let ratio = self.jitter_ratio.clamp(0.0, 1.0);
        let factor = 1.0 + rand::thread_rng().gen_range(-ratio..=ratio);
        self.base_delay.mul_f64(factor)
    }
}

//! Retry with exponential backoff for retryable errors.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{BootstrapError, Result};

/// Exponential backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub factor: u32,
    pub max: Duration,
}

/// Base delay for exponential backoff (in seconds).
const RETRY_BASE_DELAY_SECS: u64 = 2;
const RETRY_MAX_DELAY_SECS: u64 = 30;

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(RETRY_BASE_DELAY_SECS),
            factor: 2,
            max: Duration::from_secs(RETRY_MAX_DELAY_SECS),
        }
    }
}

impl Backoff {
    /// Delay before the attempt following `attempt` (1-based): 2s, 4s, 8s, ...
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial
            .saturating_mul(self.factor.saturating_pow(exponent))
            .min(self.max)
    }
}

/// Runs `attempt_fn` until it succeeds, fails fatally, or the next delay
/// would cross `deadline`.
pub async fn retry<T, F, Fut>(
    operation: &str,
    deadline: Instant,
    backoff: Backoff,
    mut attempt_fn: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match attempt_fn(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                let delay = backoff.delay(attempt);
                if Instant::now() + delay >= deadline {
                    tracing::warn!(operation, attempt, error = %e, "giving up after retryable error");
                    return Err(BootstrapError::RetriesExhausted {
                        operation: operation.to_string(),
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
                tracing::warn!(
                    operation,
                    attempt,
                    delay_secs = delay.as_secs_f64(),
                    error = %e,
                    "retrying after retryable error"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

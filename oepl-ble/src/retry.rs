//! Whole-operation retry with linear backoff

use std::time::Duration;

use crate::Error;

/// Attempts and linear backoff around a whole connect-transfer-disconnect cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Backoff after attempt `n` (0-based) is `backoff_step * (n + 1)`
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_step: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_step * (attempt + 1)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error or the
    /// attempts are used up
    pub async fn run<T, F>(&self, address: &str, operation: &str, mut op: F) -> Result<T, Error>
    where
        F: AsyncFnMut() -> Result<T, Error>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => {
                    tracing::error!(address, operation, error = %e, "operation failed, not retrying");
                    return Err(e);
                }
                Err(e) if attempt + 1 >= attempts => {
                    tracing::error!(address, operation, attempts, error = %e, "operation failed");
                    return Err(e);
                }
                Err(e) => {
                    let backoff = self.backoff(attempt);
                    tracing::warn!(
                        address,
                        operation,
                        attempt = attempt + 1,
                        ?backoff,
                        error = %e,
                        "operation failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}

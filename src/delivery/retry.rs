use crate::config::types::RetryConfig;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Upper bound on a single backoff wait.
const MAX_DELAY: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum RetryError<E: std::error::Error + 'static> {
    #[error("cancelled")]
    Cancelled,

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: E,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed after the first one fails
    pub retry_count: u32,
    pub base_interval: Duration,
    pub exponential_backoff: bool,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            retry_count: config.count,
            base_interval: config.interval,
            exponential_backoff: config.exponential_backoff,
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `attempt` (0 for the first retry).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if !self.exponential_backoff {
            return self.base_interval.min(MAX_DELAY);
        }
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_interval
            .checked_mul(factor)
            .unwrap_or(MAX_DELAY)
            .min(MAX_DELAY)
    }

    pub fn max_attempts(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }

    /// Run `operation` until it succeeds, attempts run out, or `cancel` fires.
    ///
    /// Cancellation wins over both an in-flight attempt and a pending wait;
    /// no attempt is started once the token is cancelled.
    pub async fn run<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        E: std::error::Error + 'static,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                result = operation(attempt) => result,
            };

            let error = match result {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            attempt += 1;
            if attempt >= self.max_attempts() {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            let delay = self.delay_for(attempt - 1);
            tracing::warn!(
                attempt = attempt,
                max_attempts = self.max_attempts(),
                backoff_ms = delay.as_millis() as u64,
                error = %error,
                "Attempt failed, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

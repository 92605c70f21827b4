use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::infrastructure::fetch::FetchError;

/// Backoff settings for transient fetch failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Adds up to `base_delay / 2`, never past `max_delay`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1`: `base * 2^attempt`, capped.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let capped = self
            .base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if !self.jitter {
            return capped;
        }

        let half_base = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX) / 2;
        let headroom = u64::try_from(self.max_delay.saturating_sub(capped).as_millis()).unwrap_or(0);
        let limit = half_base.min(headroom);
        if limit == 0 {
            return capped;
        }
        capped + Duration::from_millis(rand::rng().random_range(0..limit))
    }
}

/// Terminal outcome of a retried operation.
#[derive(Debug)]
pub struct RetryFailure {
    pub error: FetchError,
    pub attempts: u32,
}

/// Runs `operation` until it succeeds, fails with a non-transient error, or
/// the retry budget is spent. Backoff sleeps race the cancellation token.
/// On success returns the value and how many attempts it took.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    mut operation: F,
) -> Result<(T, u32), RetryFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = 0u32;
    loop {
        if token.is_cancelled() {
            return Err(RetryFailure {
                error: FetchError::Cancelled,
                attempts: attempt,
            });
        }

        let error = match operation(attempt).await {
            Ok(value) => return Ok((value, attempt + 1)),
            Err(error) => error,
        };
        let attempts = attempt + 1;
        if !error.is_transient() || attempt >= policy.max_retries {
            return Err(RetryFailure { error, attempts });
        }

        let delay = policy.delay_for_attempt(attempt);
        warn!(
            attempt = attempts,
            max_retries = policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "🔁 Retrying fetch after transient error"
        );
        tokio::select! {
            _ = token.cancelled() => {
                return Err(RetryFailure { error: FetchError::Cancelled, attempts });
            }
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}

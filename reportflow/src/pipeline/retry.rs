//! Bounded retry with constant or exponential backoff.
//!
//! Each collaborator gets its own [`RetryConfig`]; the caller supplies the
//! predicate deciding which errors are worth another attempt.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backoff {
    /// delay = base
    Constant,
    /// delay = min(base * 2^retry, max)
    Exponential,
}

/// Retry policy for one collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts, including the first. Never below 1.
    pub max_attempts: usize,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for exponential delays.
    pub max_delay: Duration,
    /// Growth of the delay.
    pub backoff: Backoff,
    /// Draw each delay uniformly from `0..=delay`.
    pub full_jitter: bool,
}

impl RetryConfig {
    /// Fixed delay between attempts, no jitter.
    #[must_use]
    pub fn constant(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: delay,
            max_delay: delay,
            backoff: Backoff::Constant,
            full_jitter: false,
        }
    }

    /// Doubling delay from `base` capped at `max`, with full jitter.
    #[must_use]
    pub fn exponential(max_attempts: usize, base: Duration, max: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: base,
            max_delay: max,
            backoff: Backoff::Exponential,
            full_jitter: true,
        }
    }

    /// Upper bound of the delay before retry number `retry` (0-based).
    #[must_use]
    pub fn delay_ceiling(&self, retry: u32) -> Duration {
        match self.backoff {
            Backoff::Constant => self.base_delay,
            Backoff::Exponential => self
                .base_delay
                .saturating_mul(2u32.saturating_pow(retry))
                .min(self.max_delay),
        }
    }

    fn delay(&self, retry: u32) -> Duration {
        let ceiling = self.delay_ceiling(retry);
        if !self.full_jitter || ceiling.is_zero() {
            return ceiling;
        }
        let millis = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
    }
}

/// Final result of [`with_retry`] plus how many attempts it took.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    /// The last attempt's result.
    pub result: Result<T, E>,
    /// Attempts made, including the first.
    pub attempts: usize,
}

/// Runs `operation` until it succeeds, fails with an error `is_retryable`
/// rejects, or the attempts run out.
pub async fn with_retry<T, E, F, Fut, P>(
    config: &RetryConfig,
    is_retryable: P,
    mut operation: F,
) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempts = 0;

    loop {
        attempts += 1;
        match operation().await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts,
                }
            }
            Err(e) if attempts < config.max_attempts && is_retryable(&e) => {
                let delay = config.delay(u32::try_from(attempts - 1).unwrap_or(u32::MAX));
                debug!(
                    attempt = attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "Retrying after error"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return RetryOutcome {
                    result: Err(e),
                    attempts,
                }
            }
        }
    }
}

//! Retry logic with random jitter
//!
//! This module retries operations that fail due to transient issues like
//! deadlines or transport errors. Failures the caller classifies as final are
//! returned immediately.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Configuration for retry behavior
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,
    /// Exclusive upper bound of the random pause between attempts
    pub max_jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_jitter: Duration::from_secs(2),
        }
    }
}

impl RetryConfig {
    /// Retries up to `max_attempts` times without pausing.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            max_jitter: Duration::ZERO,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }
}

/// Result of a retried operation together with the attempts it took.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

/// Returns a uniformly random duration in `[0, max)` with millisecond resolution.
pub fn jitter(max: Duration) -> Duration {
    let millis = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    if millis == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..millis))
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// the attempt budget is spent.
///
/// `operation` receives the 1-based attempt number.
pub async fn execute_with_retry<F, Fut, T, E, C>(
    mut operation: F,
    config: &RetryConfig,
    is_retryable: C,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
    E: Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation(attempt).await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                }
            }
            Err(err) => {
                if attempt >= max_attempts || !is_retryable(&err) {
                    return RetryOutcome {
                        result: Err(err),
                        attempts: attempt,
                    };
                }
                let pause = jitter(config.max_jitter);
                tracing::warn!(
                    attempt,
                    max_attempts,
                    error = %err,
                    "Attempt failed, retrying in {:?}",
                    pause
                );
                tokio::time::sleep(pause).await;
            }
        }
    }
}

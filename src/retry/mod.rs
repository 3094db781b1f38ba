//! Retry engine: attempt loop, exponential backoff with jitter, and error
//! classification.
//!
//! One logical call moves through
//! `Attempting -> {Success | Retrying -> Attempting | Exhausted | Cancelled}`.
//! Every attempt runs under a fresh timeout token merged with the call's own
//! token; whichever fires first decides whether the abort is a retryable
//! timeout or a terminal cancellation.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::ConfigError;
use crate::error::FetchError;
use crate::transport::TransportError;

/// How many attempts a logical call gets and how they are spaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for every retry after it.
    pub base_backoff: Duration,
    /// Upper bound on a single attempt.
    pub timeout: Duration,
    /// Random delay in `[0, max_jitter)` added to every backoff.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
            timeout: Duration::from_millis(7000),
            max_jitter: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no backoff.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_backoff: Duration::ZERO,
            max_jitter: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "max_attempts",
                requirement: "at least 1",
            });
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "timeout_ms",
                requirement: "greater than zero",
            });
        }
        Ok(())
    }

    /// Deterministic part of the delay after attempt `attempt`: `base_backoff * 2^(attempt-1)`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_backoff.saturating_mul(factor)
    }

    /// Full delay after attempt `attempt`: [`base_delay`](Self::base_delay) plus jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let jitter_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(fastrand::u64(0..jitter_ms))
        };
        self.base_delay(attempt).saturating_add(jitter)
    }
}

/// Runs an operation under a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryEngine {
    policy: RetryPolicy,
}

impl RetryEngine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `attempt` until it succeeds, fails terminally, runs out of
    /// attempts, or `call` fires.
    ///
    /// `attempt` receives the 1-based attempt number and the merged
    /// per-attempt token to hand to the transport. Its future is dropped as
    /// soon as that token fires.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Cancelled`]: `call` fired, during an attempt or a backoff sleep.
    /// - Any non-retryable error from `attempt`, unchanged (e.g. [`FetchError::HttpClient`]).
    /// - [`FetchError::ExhaustedRetries`]: every attempt failed with a retryable error.
    pub async fn run<T, F, Fut>(&self, call: &CancelToken, mut attempt: F) -> Result<T, FetchError>
    where
        F: FnMut(u32, CancelToken) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut number = 1;

        loop {
            if let Some(reason) = call.reason() {
                return Err(FetchError::Cancelled(reason));
            }

            let token = CancelToken::merge(Some(call), CancelToken::timeout(self.policy.timeout));
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => Err(self.aborted(call)),
                result = attempt(number, token.clone()) => match result {
                    Err(FetchError::Network(TransportError::Aborted(_))) => Err(self.aborted(call)),
                    other => other,
                },
            };

            let error = match outcome {
                Ok(_) if call.is_cancelled() => return Err(self.aborted(call)),
                Ok(value) => {
                    if number > 1 {
                        info!(attempt = number, "request succeeded after retrying");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !error.is_retryable() {
                debug!(attempt = number, error = %error, "terminal failure, not retrying");
                return Err(error);
            }

            if number >= max_attempts {
                warn!(attempts = number, error = %error, "retries exhausted");
                return Err(FetchError::ExhaustedRetries {
                    attempts: number,
                    last: Box::new(error),
                });
            }

            let delay = self.policy.backoff(number);
            warn!(
                attempt = number,
                max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "attempt failed, backing off"
            );

            tokio::select! {
                biased;
                reason = call.cancelled() => return Err(FetchError::Cancelled(reason)),
                () = sleep(delay) => {}
            }
            number += 1;
        }
    }

    /// The attempt was cut off: a cancellation if the call itself fired, a
    /// timeout otherwise.
    fn aborted(&self, call: &CancelToken) -> FetchError {
        match call.reason() {
            Some(reason) => FetchError::Cancelled(reason),
            None => FetchError::Timeout(self.policy.timeout),
        }
    }
}

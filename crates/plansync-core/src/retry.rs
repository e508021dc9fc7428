//! Bounded exponential-backoff retry
//!
//! Only errors whose [`Transient::is_transient`] is true are retried.
//! Business outcomes such as a revision conflict must travel in the `Ok`
//! value of the wrapped operation, so they can never be replayed.
//!
//! Delay before retry `n` (1-based failed attempt):
//! `min(max_delay, initial_delay * multiplier^(n-1))`

use crate::config::ConfigError;
use plansync_store::StoreError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Errors that know whether a retry may help
pub trait Transient {
    /// Check if the failure is transport-class
    fn is_transient(&self) -> bool;
}

impl Transient for StoreError {
    fn is_transient(&self) -> bool {
        StoreError::is_transient(self)
    }
}

/// Retry budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 5000,
            backoff_multiplier: 2,
        }
    }
}

impl RetryConfig {
    /// Budget with the given delays (tests, simulation)
    #[inline]
    #[must_use]
    pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay_ms = u64::try_from(initial.as_millis()).unwrap_or(u64::MAX);
        self.max_delay_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With attempt count
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Check value ranges
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] for zero attempts or a zero multiplier
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.backoff_multiplier == 0 {
            return Err(ConfigError::Invalid(
                "retry.backoff_multiplier must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Retry failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryError<E> {
    /// Transient failures outlived the budget
    #[error("gave up after {attempts} attempt(s): {last_error}")]
    Exhausted { attempts: u32, last_error: E },

    /// Non-transient failure; not retried
    #[error("permanent failure on attempt {attempts}: {error}")]
    Permanent { attempts: u32, error: E },
}

impl<E> RetryError<E> {
    /// Attempts made before giving up
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } | Self::Permanent { attempts, .. } => *attempts,
        }
    }

    /// Underlying error
    #[must_use]
    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { last_error, .. } => last_error,
            Self::Permanent { error, .. } => error,
        }
    }
}

/// One scheduled retry, as reported to telemetry hooks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryEvent {
    pub operation: &'static str,
    /// Attempt that just failed
    pub attempt: u32,
    /// Wait before the next attempt
    pub delay: Duration,
    pub error: String,
}

/// Session-level retry telemetry hook
pub type RetryHook = Arc<dyn Fn(&RetryEvent) + Send + Sync>;

/// Exponential-backoff retry policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create policy from a budget
    #[inline]
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Budget
    #[inline]
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Wait after failed attempt `attempt` (1-based)
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = u64::from(self.config.backoff_multiplier)
            .checked_pow(exponent)
            .unwrap_or(u64::MAX);
        let millis = self
            .config
            .initial_delay_ms
            .saturating_mul(factor)
            .min(self.config.max_delay_ms);
        Duration::from_millis(millis)
    }

    /// Upper bound on cumulative waiting
    #[must_use]
    pub fn max_total_wait(&self) -> Duration {
        Duration::from_millis(
            self.config
                .max_delay_ms
                .saturating_mul(u64::from(self.config.max_attempts)),
        )
    }

    /// Run `op` until it succeeds, fails permanently or exhausts the budget
    ///
    /// `op` receives the 1-based attempt number. `on_retry` is called with
    /// the failed attempt, its error and the upcoming delay before each wait.
    ///
    /// # Errors
    /// Returns [`RetryError::Permanent`] on the first non-transient error and
    /// [`RetryError::Exhausted`] when every attempt failed transiently
    pub async fn run<T, E, F, Fut, O>(&self, mut op: F, mut on_retry: O) -> Result<T, RetryError<E>>
    where
        E: Transient,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        O: FnMut(u32, &E, Duration),
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) if !error.is_transient() => {
                    return Err(RetryError::Permanent {
                        attempts: attempt,
                        error,
                    });
                }
                Err(error) if attempt >= max_attempts => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last_error: error,
                    });
                }
                Err(error) => {
                    let delay = self.delay_for(attempt);
                    on_retry(attempt, &error, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

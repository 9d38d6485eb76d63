//! Retry logic for remote ledger calls.
//!
//! # Responsibilities
//! - Run any remote operation up to `max_attempts` times
//! - Wait `base * multiplier^(k-1)` between attempt `k` and `k + 1`
//! - Fall back to a secondary operation exactly once when retries run out
//! - Abort a pending wait as soon as shutdown is triggered
//!
//! The wait suspends the calling task; spawn the call if the caller must not
//! be held up.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::blockchain::types::{NodeError, NodeResult};
use crate::config::RetryConfig;
use crate::lifecycle::ShutdownSignal;
use crate::resilience::backoff::calculate_backoff;

/// Immutable retry configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// 0 = uncapped.
    pub max_delay_ms: u64,
    pub jitter_ratio: f64,
}

impl RetryPolicy {
    /// Policy with the exact exponential formula (no cap, no jitter).
    pub fn new(max_attempts: u32, base_delay_ms: u64, backoff_multiplier: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
            backoff_multiplier: backoff_multiplier.max(1.0),
            max_delay_ms: 0,
            jitter_ratio: 0.0,
        }
    }

    /// Delay after failed attempt `attempt` (1-indexed).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        calculate_backoff(
            attempt,
            self.base_delay_ms,
            self.backoff_multiplier,
            self.max_delay_ms,
            self.jitter_ratio,
        )
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_delay_ms: config.max_delay_ms,
            jitter_ratio: config.jitter_ratio,
            ..Self::new(config.max_attempts, config.base_delay_ms, config.backoff_multiplier)
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

/// A value-returning operation against the ledger node.
///
/// Implemented for every `FnMut() -> impl Future<Output = NodeResult<T>>`,
/// so call sites pass closures.
pub trait RemoteCall<T>: Send {
    type Future: Future<Output = NodeResult<T>> + Send;

    fn call(&mut self) -> Self::Future;
}

impl<T, F, Fut> RemoteCall<T> for F
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = NodeResult<T>> + Send,
{
    type Future = Fut;

    fn call(&mut self) -> Fut {
        self()
    }
}

/// Failure surfaced once the retry policy gives up.
#[derive(Debug, Error)]
pub enum RetryError {
    /// Every attempt failed.
    #[error("{label} failed after {attempts} attempts: {source}")]
    Exhausted {
        label: String,
        attempts: u32,
        #[source]
        source: NodeError,
    },

    /// Primary retries and the single fallback call both failed.
    #[error("{label} failed and its fallback failed too (primary: {primary}; fallback: {fallback})")]
    FallbackExhausted {
        label: String,
        primary: NodeError,
        #[source]
        fallback: NodeError,
    },

    /// Shutdown interrupted a backoff wait.
    #[error("{label} cancelled after {attempts} attempts")]
    Cancelled { label: String, attempts: u32 },
}

impl RetryError {
    /// Label of the operation that failed.
    pub fn label(&self) -> &str {
        match self {
            RetryError::Exhausted { label, .. }
            | RetryError::FallbackExhausted { label, .. }
            | RetryError::Cancelled { label, .. } => label,
        }
    }

    /// The last underlying remote failure, if any.
    pub fn last_cause(&self) -> Option<&NodeError> {
        match self {
            RetryError::Exhausted { source, .. } => Some(source),
            RetryError::FallbackExhausted { fallback, .. } => Some(fallback),
            RetryError::Cancelled { .. } => None,
        }
    }
}

/// Runs remote operations under a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    shutdown: ShutdownSignal,
}

impl RetryExecutor {
    /// Executor that is never cancelled.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            shutdown: ShutdownSignal::never(),
        }
    }

    /// Abort backoff waits when `signal` fires.
    pub fn with_shutdown(mut self, signal: ShutdownSignal) -> Self {
        self.shutdown = signal;
        self
    }

    /// Run `operation` until it succeeds or the policy is exhausted.
    ///
    /// A non-transient error ends the run after the attempt that raised it.
    pub async fn execute_with_retry<T, C>(&self, mut operation: C, label: &str) -> Result<T, RetryError>
    where
        C: RemoteCall<T>,
    {
        let max_attempts = self.policy.max_attempts;
        let mut shutdown = self.shutdown.clone();
        let mut attempt = 0;

        loop {
            attempt += 1;
            tracing::debug!(label, attempt, max_attempts, "Executing remote call");

            let error = match operation.call().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(label, attempt, "Remote call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !error.is_transient() {
                tracing::error!(label, attempts = attempt, error = %error, "Remote call failed permanently");
                return Err(RetryError::Exhausted {
                    label: label.to_string(),
                    attempts: attempt,
                    source: error,
                });
            }

            if attempt >= max_attempts {
                tracing::error!(label, attempts = attempt, error = %error, "Remote call exhausted retries");
                return Err(RetryError::Exhausted {
                    label: label.to_string(),
                    attempts: attempt,
                    source: error,
                });
            }

            let delay = self.policy.delay_after(attempt);
            tracing::warn!(
                label,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Remote call failed; retrying"
            );

            tokio::select! {
                biased;
                _ = shutdown.wait() => {
                    tracing::warn!(label, attempt, "Retry wait interrupted by shutdown");
                    return Err(RetryError::Cancelled {
                        label: label.to_string(),
                        attempts: attempt,
                    });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Side-effecting variant of [`execute_with_retry`](Self::execute_with_retry).
    pub async fn run_with_retry<C>(&self, operation: C, label: &str) -> Result<(), RetryError>
    where
        C: RemoteCall<()>,
    {
        self.execute_with_retry(operation, label).await
    }

    /// Retry `primary`; when it is exhausted call `fallback` once.
    pub async fn execute_with_fallback<T, C, F, Fut>(
        &self,
        primary: C,
        fallback: F,
        label: &str,
    ) -> Result<T, RetryError>
    where
        C: RemoteCall<T>,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = NodeResult<T>> + Send,
    {
        let primary_error = match self.execute_with_retry(primary, label).await {
            Ok(value) => return Ok(value),
            Err(RetryError::Exhausted { source, .. }) => source,
            Err(other) => return Err(other),
        };

        tracing::warn!(label, error = %primary_error, "Primary exhausted; using fallback");
        match fallback().await {
            Ok(value) => Ok(value),
            Err(fallback_error) => {
                tracing::error!(label, error = %fallback_error, "Fallback failed");
                Err(RetryError::FallbackExhausted {
                    label: label.to_string(),
                    primary: primary_error,
                    fallback: fallback_error,
                })
            }
        }
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

//! Bounded exponential-backoff retry around catalog calls.
//!
//! Only transient failures (5xx, transport) are retried. Client errors and
//! decode failures propagate on the first attempt. When retries run out the
//! request is recorded in the [`FailureTracker`] and the call degrades to "no
//! result", unless the policy asks for the last error instead.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::catalog::CatalogError;
use crate::config::PluginConfig;
use crate::failure::FailureTracker;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, counting the first. Zero behaves like one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each later one.
    pub initial_delay: Duration,
    /// Return the last error on exhaustion instead of `Ok(None)`.
    pub raise_on_exhaustion: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            raise_on_exhaustion: false,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &PluginConfig) -> Self {
        Self {
            max_attempts: config.retry_max_attempts,
            initial_delay: Duration::from_millis(config.retry_initial_delay_ms),
            raise_on_exhaustion: config.raise_on_retry_exhaustion,
        }
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay after the failed `attempt` (1-indexed): `initial * 2^(attempt-1)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(multiplier)
            .unwrap_or(Duration::MAX)
    }
}

/// Runs catalog calls under a [`RetryPolicy`], sharing one [`FailureTracker`].
pub struct RetryExecutor {
    policy: RwLock<RetryPolicy>,
    failures: Arc<FailureTracker>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy, failures: Arc<FailureTracker>) -> Self {
        Self {
            policy: RwLock::new(policy),
            failures,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy.read().clone()
    }

    pub fn set_policy(&self, policy: RetryPolicy) {
        *self.policy.write() = policy;
    }

    pub fn failures(&self) -> &Arc<FailureTracker> {
        &self.failures
    }

    /// Run `operation` for the request identified by `url`.
    ///
    /// `operation` receives the 1-indexed attempt number. Returns
    /// `Ok(None)` without calling it when `url` is a known failure.
    pub async fn execute<T, F, Fut>(
        &self,
        url: &str,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<Option<T>, CatalogError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, CatalogError>>,
    {
        if self.failures.is_known_failure(url) {
            debug!("Skipping request with a recent recorded failure");
            return Ok(None);
        }

        let policy = self.policy();
        let attempts = policy.attempts();
        let mut attempt = 1;

        loop {
            if cancel.is_cancelled() {
                return Err(CatalogError::Cancelled);
            }

            let err = match operation(attempt).await {
                Ok(value) => return Ok(Some(value)),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            if attempt >= attempts {
                warn!(attempts, error = %err, "Retries exhausted, suppressing request");
                self.failures.record_failure(url, &err.to_string());
                return if policy.raise_on_exhaustion {
                    Err(err)
                } else {
                    Ok(None)
                };
            }

            let delay = policy.delay_for_attempt(attempt);
            warn!(
                attempt,
                max = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying after transient error"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(CatalogError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

//! Transient-failure retry with linear or exponential backoff
//!
//! Delays are computed per attempt index `n` (0-based, counting completed
//! attempts): exponential waits `base * 2^n`, linear waits `base * (n + 1)`.
//! With the defaults (3 attempts, 1000ms, exponential) a request that keeps
//! failing is sent three times with waits of 1000ms and 2000ms in between.

use crate::config::duration_ms;
use crate::error::HttpClientError;
use backoff::backoff::Backoff;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Backoff curve between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// `base * (n + 1)`
    Linear,
    /// `base * 2^n`
    #[default]
    Exponential,
}

/// Custom retry predicate
pub type RetryPredicate = Arc<dyn Fn(&HttpClientError) -> bool + Send + Sync>;

/// Retry configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryOptions {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Base delay between attempts
    #[serde(rename = "delay", with = "duration_ms")]
    pub base_delay: Duration,
    /// Backoff curve
    pub backoff: BackoffKind,
    /// Upper bound for a single wait
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,
    /// Overrides the transient-error classification when set
    #[serde(skip)]
    pub should_retry: Option<RetryPredicate>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            backoff: BackoffKind::Exponential,
            max_delay: Duration::from_secs(30),
            should_retry: None,
        }
    }
}

impl fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("backoff", &self.backoff)
            .field("max_delay", &self.max_delay)
            .field("should_retry", &self.should_retry.as_ref().map(|_| "<predicate>"))
            .finish()
    }
}

impl RetryOptions {
    /// Create options with a custom attempt budget
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts, ..Default::default() }
    }

    /// A single attempt, no retries
    pub fn none() -> Self {
        Self::new(1)
    }

    /// Set the base delay
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the backoff curve
    pub fn with_backoff(mut self, backoff: BackoffKind) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the upper bound for a single wait
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Replace the transient-error classification
    pub fn with_should_retry(
        mut self,
        predicate: impl Fn(&HttpClientError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_retry = Some(Arc::new(predicate));
        self
    }
}

/// Uncapped delay before the retry that follows attempt `attempt_index`
pub fn delay_for(attempt_index: u32, backoff: BackoffKind, base_delay: Duration) -> Duration {
    match backoff {
        BackoffKind::Exponential => {
            base_delay.saturating_mul(2u32.saturating_pow(attempt_index))
        }
        BackoffKind::Linear => base_delay.saturating_mul(attempt_index.saturating_add(1)),
    }
}

/// Retry decisions for one request
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    options: RetryOptions,
}

impl RetryPolicy {
    /// Create a policy from options
    pub fn new(options: RetryOptions) -> Self {
        Self { options }
    }

    /// Underlying options
    pub fn options(&self) -> &RetryOptions {
        &self.options
    }

    /// Attempt budget, never less than one
    pub fn max_attempts(&self) -> u32 {
        self.options.max_attempts.max(1)
    }

    /// Whether `error` is worth another attempt at all
    pub fn is_retryable(&self, error: &HttpClientError) -> bool {
        match &self.options.should_retry {
            Some(predicate) => predicate(error),
            None => error.is_transient(),
        }
    }

    /// Whether to retry after `error` ended attempt `attempt_index`
    pub fn should_retry(&self, error: &HttpClientError, attempt_index: u32) -> bool {
        attempt_index.saturating_add(1) < self.max_attempts() && self.is_retryable(error)
    }

    /// Capped wait after attempt `attempt_index`
    pub fn delay(&self, attempt_index: u32) -> Duration {
        delay_for(attempt_index, self.options.backoff, self.options.base_delay)
            .min(self.options.max_delay)
    }

    /// Fresh schedule of waits for one request
    pub fn schedule(&self) -> RetrySchedule {
        RetrySchedule::new(self.clone())
    }

    /// Run `operation` until it succeeds, fails permanently, or the budget is spent
    ///
    /// The operation receives the 0-based attempt index. The error of the
    /// last attempt is returned unchanged.
    pub async fn run<F, Fut, T>(&self, mut operation: F) -> Result<T, HttpClientError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, HttpClientError>>,
    {
        let mut schedule = self.schedule();
        let mut attempt = 0;

        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !self.should_retry(&err, attempt) {
                        return Err(err);
                    }

                    let Some(delay) = schedule.next_backoff() else {
                        return Err(err);
                    };

                    debug!(
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient failure, retrying"
                    );

                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Stateful wait sequence for one request
///
/// Yields `max_attempts - 1` delays and then `None`.
#[derive(Debug, Clone)]
pub struct RetrySchedule {
    policy: RetryPolicy,
    attempt: u32,
}

impl RetrySchedule {
    fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Waits handed out so far
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

impl Backoff for RetrySchedule {
    fn reset(&mut self) {
        self.attempt = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.attempt.saturating_add(1) >= self.policy.max_attempts() {
            return None;
        }

        let delay = self.policy.delay(self.attempt);
        self.attempt += 1;
        Some(delay)
    }
}

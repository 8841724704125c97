//! Retry with exponential backoff.
//!
//! Only failures that carry an [`ApiError`] are candidates for retry, and
//! only when the policy's predicate accepts them. Everything else returns on
//! first occurrence.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use serde::de::DeserializeOwned;

use crate::error::{ApiError, Error, Result};
use crate::response::ResponseWrapper;
use crate::status::{RETRY_AFTER, is_retryable_status, map_status};

/// Predicate deciding whether a failure may be retried.
pub type RetryPredicate = Arc<dyn Fn(&ApiError) -> bool + Send + Sync>;

/// Default number of attempts, including the first one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default delay before the second attempt.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(1000);
/// Default upper bound for any single delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(10_000);
/// Default growth factor of the delay between attempts.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Validated retry configuration.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
    retry_on: RetryPredicate,
}

impl RetryPolicy {
    /// Creates a policy using the default predicate [`ApiError::is_retryable`].
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Result<Self> {
        if max_attempts < 1 {
            return Err(Error::InvalidRetryPolicy(
                "max_attempts must be >= 1".to_string(),
            ));
        }
        if initial_delay.is_zero() {
            return Err(Error::InvalidRetryPolicy(
                "initial_delay must be > 0".to_string(),
            ));
        }
        if max_delay < initial_delay {
            return Err(Error::InvalidRetryPolicy(
                "max_delay must be >= initial_delay".to_string(),
            ));
        }
        // Written this way so NaN is rejected too.
        if !(backoff_multiplier >= 1.0) || !backoff_multiplier.is_finite() {
            return Err(Error::InvalidRetryPolicy(
                "backoff_multiplier must be >= 1.0".to_string(),
            ));
        }

        Ok(Self {
            max_attempts,
            initial_delay,
            max_delay,
            backoff_multiplier,
            retry_on: Arc::new(ApiError::is_retryable),
        })
    }

    /// Replaces the retry predicate.
    pub fn retry_on<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ApiError) -> bool + Send + Sync + 'static,
    {
        self.retry_on = Arc::new(predicate);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    pub fn should_retry(&self, error: &ApiError) -> bool {
        (self.retry_on)(error)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            retry_on: Arc::new(ApiError::is_retryable),
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .finish_non_exhaustive()
    }
}

/// Error types the retry loop can look into.
///
/// Returning `None` marks the failure as not a retry candidate.
pub trait RetryableFailure {
    fn api_error(&self) -> Option<&ApiError>;
}

impl RetryableFailure for ApiError {
    fn api_error(&self) -> Option<&ApiError> {
        Some(self)
    }
}

impl RetryableFailure for Error {
    fn api_error(&self) -> Option<&ApiError> {
        self.as_api_error()
    }
}

impl RetryableFailure for anyhow::Error {
    fn api_error(&self) -> Option<&ApiError> {
        self.downcast_ref::<ApiError>()
            .or_else(|| self.downcast_ref::<Error>().and_then(Error::as_api_error))
    }
}

/// Runs `operation` until it succeeds, the attempts run out, or a failure
/// is not retryable.
///
/// The delay starts at `initial_delay` and is multiplied after every wait,
/// capped at `max_delay`. A 429 with `Retry-After` waits that long instead
/// (also capped); the exponential delay still advances in that case.
///
/// Dropping the returned future cancels the pending attempt or sleep.
#[tracing::instrument(skip_all, fields(max_attempts = policy.max_attempts))]
pub async fn with_retry<F, Fut, T, E>(policy: &RetryPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableFailure + fmt::Display,
{
    let mut current_delay = policy.initial_delay;
    let mut attempt: u32 = 0;

    loop {
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let last_attempt = attempt + 1 >= policy.max_attempts;
        let Some(api_error) = error.api_error() else {
            debug!("Attempt {} failed with non-API error: {}", attempt + 1, error);
            return Err(error);
        };
        if last_attempt || !policy.should_retry(api_error) {
            debug!(
                "Attempt {}/{} failed ({}), not retrying",
                attempt + 1,
                policy.max_attempts,
                error
            );
            return Err(error);
        }

        let delay = match api_error.retry_after_seconds() {
            Some(seconds) => Duration::from_secs(seconds).min(policy.max_delay),
            None => current_delay.min(policy.max_delay),
        };

        warn!(
            "Attempt {}/{} failed ({}), retrying in {}ms...",
            attempt + 1,
            policy.max_attempts,
            error,
            delay.as_millis()
        );
        tokio::time::sleep(delay).await;

        current_delay = next_delay(current_delay, policy.backoff_multiplier);
        attempt += 1;
    }
}

/// Multiplies the delay, truncating to whole milliseconds.
fn next_delay(current: Duration, multiplier: f64) -> Duration {
    // Float to int casts saturate, so huge delays clamp to u64::MAX ms.
    Duration::from_millis((current.as_millis() as f64 * multiplier) as u64)
}

/// Retries a dispatcher call, treating 408, 429, 500, 502, 503 and 504
/// responses as failures.
///
/// Retryable statuses are mapped with [`map_status`] (with `Retry-After`)
/// before the policy predicate sees them. With the default predicate this
/// means 500 is converted but not retried, while 408 becomes a generic
/// HTTP error that is also not retried. When attempts run out, the mapped
/// error is returned.
#[tracing::instrument(skip_all)]
pub async fn retry_request<F, Fut, T>(policy: &RetryPolicy, mut call: F) -> Result<ResponseWrapper<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ResponseWrapper<T>>>,
    T: DeserializeOwned,
{
    with_retry(policy, || {
        let pending = call();
        async move {
            let response = pending.await?;
            let status = response.status().as_u16();
            if is_retryable_status(status) {
                let error_body = response.error_body();
                return Err(Error::Api(map_status(
                    status,
                    error_body.as_deref(),
                    response.header(RETRY_AFTER),
                )));
            }
            Ok(response)
        }
    })
    .await
}

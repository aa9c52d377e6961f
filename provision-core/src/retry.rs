//! Bounded retry with exponential backoff for database round trips.
//!
//! Only transport failures are retried. Every other error is returned to the
//! caller on the first attempt.

use crate::error::AppError;
use backoff::backoff::Backoff;
use backoff::future::retry_notify;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

const JITTER_FACTOR: f64 = 0.25;

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    /// Spread each wait by up to 25% either way.
    pub add_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Exponential policy that stops after `max_retries` waits.
    pub fn policy(&self) -> BoundedBackoff {
        let inner = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_backoff)
            .with_max_interval(self.max_backoff)
            .with_multiplier(self.backoff_multiplier)
            .with_randomization_factor(if self.add_jitter { JITTER_FACTOR } else { 0.0 })
            .with_max_elapsed_time(None)
            .build();

        BoundedBackoff {
            inner,
            max_retries: self.max_retries,
            remaining: self.max_retries,
        }
    }
}

/// [`ExponentialBackoff`] capped by a retry count instead of elapsed time.
pub struct BoundedBackoff {
    inner: ExponentialBackoff,
    max_retries: u32,
    remaining: u32,
}

impl Backoff for BoundedBackoff {
    fn reset(&mut self) {
        self.remaining = self.max_retries;
        self.inner.reset();
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.inner.next_backoff()
    }
}

/// Run `f` until it succeeds, fails with a non-transport error, or the retry
/// budget is spent.
pub async fn retry_call<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut f: F,
) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut retries: u32 = 0;

    let result = retry_notify(
        config.policy(),
        || {
            let call = f();
            async move {
                call.await.map_err(|err| {
                    if err.is_connection_failure() {
                        backoff::Error::transient(err)
                    } else {
                        backoff::Error::permanent(err)
                    }
                })
            }
        },
        |err: AppError, wait: Duration| {
            retries += 1;
            warn!(
                operation = operation_name,
                attempt = retries,
                error = %err,
                backoff_ms = wait.as_millis() as u64,
                "Connection failure, retrying after backoff"
            );
        },
    )
    .await;

    match &result {
        Ok(_) if retries > 0 => info!(
            operation = operation_name,
            attempt = retries + 1,
            "Call succeeded after retry"
        ),
        Err(err) if err.is_connection_failure() => warn!(
            operation = operation_name,
            attempt = retries + 1,
            error = %err,
            "Call failed after max retries"
        ),
        _ => {}
    }

    result
}

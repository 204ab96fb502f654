//! Retry controller
//!
//! Runs an async operation up to `max_attempts` times. Errors whose kind is not
//! retryable (auth, validation) are returned after the first attempt. Between
//! attempts the controller sleeps `min(base * multiplier^(n-1), max) + jitter`.

use std::future::Future;
use std::time::Duration;

use crmsync_core::{AppError, RetrySettings};
use rand::Rng;

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    settings: RetrySettings,
}

impl RetryPolicy {
    pub fn new(settings: RetrySettings) -> Self {
        Self { settings }
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self::new(RetrySettings {
            max_attempts: 1,
            base_delay_ms: 0,
            multiplier: 1.0,
            max_delay_ms: 0,
            jitter_ms: 0,
        })
    }

    pub fn settings(&self) -> &RetrySettings {
        &self.settings
    }

    /// Backoff before retry number `attempt` (1-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let raw = self.settings.base_delay_ms as f64 * self.settings.multiplier.powi(exponent);
        let capped = raw.min(self.settings.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let jitter = if self.settings.jitter_ms > 0 {
            rand::rng().random_range(0..=self.settings.jitter_ms)
        } else {
            0
        };
        self.base_delay(attempt) + Duration::from_millis(jitter)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the attempt
    /// budget is spent. The last error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(operation = label, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let kind = err.kind();
                    if !kind.is_retryable() {
                        tracing::warn!(
                            operation = label,
                            attempt,
                            error_code = kind.as_str(),
                            error = %err,
                            "Non-retryable error, giving up"
                        );
                        return Err(err);
                    }
                    if attempt >= max_attempts {
                        tracing::error!(
                            operation = label,
                            attempts = attempt,
                            error_code = kind.as_str(),
                            error = %err,
                            "Retry attempts exhausted"
                        );
                        return Err(err);
                    }

                    let delay = self.delay_with_jitter(attempt);
                    tracing::warn!(
                        operation = label,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error_code = kind.as_str(),
                        error = %err,
                        "Operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetrySettings::default())
    }
}

//! Bounded retry with exponential backoff.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::AIClientError;

/// Retry tuning shared by every provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for every following one.
    pub base_delay_ms: u64,
    /// Upper bound for a computed backoff delay. Vendor `retry-after` hints are not capped.
    pub max_delay_ms: Option<u64>,
    /// Overall budget across all attempts and the delays between them.
    pub total_timeout_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: Some(30_000),
            total_timeout_ms: None,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay_ms.map(Duration::from_millis)
    }

    pub fn total_timeout(&self) -> Option<Duration> {
        self.total_timeout_ms.map(Duration::from_millis)
    }
}

/// Runs an operation up to [`RetryConfig::max_attempts`] times.
///
/// A caller-supplied predicate decides per error whether another attempt is
/// worthwhile. When it says no, the error is returned immediately; when the
/// attempt budget runs out, the last error is returned unchanged.
#[derive(Debug, Clone, Default)]
pub struct RetryHandler {
    config: RetryConfig,
}

impl RetryHandler {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay to wait before retry number `retry` (0-based).
    ///
    /// `base × 2^retry`, capped by `max_delay`; a vendor `retry_after` carried by
    /// the error takes precedence.
    pub fn delay_for(&self, retry: u32, error: &AIClientError) -> Duration {
        if let Some(hint) = error.retry_after() {
            return hint;
        }
        let factor = 2u32.saturating_pow(retry);
        let delay = self.config.base_delay().saturating_mul(factor);
        match self.config.max_delay() {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    /// Executes `operation` with the default retryability rule
    /// ([`AIClientError::is_retryable`]).
    pub async fn execute_default<T, F, Fut>(&self, operation: F) -> Result<T, AIClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AIClientError>>,
    {
        self.execute(operation, AIClientError::is_retryable).await
    }

    /// Executes `operation`, retrying while `should_retry` approves the error.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::atomic::{AtomicU32, Ordering};
    /// use proposal_ai_client::error::AIClientError;
    /// use proposal_ai_client::retry::{RetryConfig, RetryHandler};
    ///
    /// # tokio::runtime::Runtime::new().unwrap().block_on(async {
    /// let handler = RetryHandler::new(RetryConfig { base_delay_ms: 1, ..RetryConfig::default() });
    /// let calls = AtomicU32::new(0);
    /// let calls = &calls;
    /// let result = handler
    ///     .execute(
    ///         move || async move {
    ///             if calls.fetch_add(1, Ordering::SeqCst) == 0 {
    ///                 Err(AIClientError::server("HTTP_502", "bad gateway"))
    ///             } else {
    ///                 Ok("done")
    ///             }
    ///         },
    ///         AIClientError::is_retryable,
    ///     )
    ///     .await;
    /// assert_eq!(result.unwrap(), "done");
    /// assert_eq!(calls.load(Ordering::SeqCst), 2);
    /// # });
    /// ```
    pub async fn execute<T, F, Fut, P>(
        &self,
        mut operation: F,
        should_retry: P,
    ) -> Result<T, AIClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AIClientError>>,
        P: Fn(&AIClientError) -> bool,
    {
        let started = Instant::now();
        let budget = self.config.total_timeout();
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let outcome = match budget {
                Some(budget) => {
                    let remaining = budget.saturating_sub(started.elapsed());
                    match tokio::time::timeout(remaining, operation()).await {
                        Ok(outcome) => outcome,
                        Err(_) => Err(AIClientError::timeout(format!(
                            "operation exceeded its {}ms budget",
                            budget.as_millis()
                        ))),
                    }
                }
                None => operation().await,
            };

            let error = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "retry succeeded");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !should_retry(&error) {
                return Err(error);
            }
            if attempt >= max_attempts {
                warn!(attempt, error = %error, "retry budget exhausted");
                return Err(error);
            }

            let delay = self.delay_for(attempt - 1, &error);
            if let Some(budget) = budget {
                if started.elapsed() + delay >= budget {
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "next retry would overrun the timeout budget"
                    );
                    return Err(error);
                }
            }

            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                kind = %error.kind(),
                code = error.code(),
                "attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Extracts the `Retry-After` header (in seconds) if present.
///
/// Providers occasionally instruct clients to wait before re-sending requests. When the
/// header is numeric this helper parses it into a [`Duration`]. HTTP-date values are
/// ignored because vendors primarily use the numeric form.
pub(crate) fn retry_after_from_headers(headers: &HashMap<String, String>) -> Option<Duration> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("retry-after"))
        .and_then(|(_, value)| value.trim().parse::<f64>().ok())
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

//! Retry with exponential backoff that honors rate-limit headers.
//!
//! The server's own hint wins when it is sane:
//!
//! 1. `retry-after-ms` (milliseconds)
//! 2. `retry-after` as seconds
//! 3. `retry-after` as an HTTP date
//!
//! A hint is accepted only if it is finite, non-negative and either no
//! larger than [`RetryOptions::max_header_delay`] or shorter than the
//! exponential delay it replaces. Otherwise the delay for retry `n` is
//! `initial_delay * backoff_factor^n`.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::options::RetryOptions;

/// Classifies failures for [`RetryPolicy`].
///
/// Implemented by the HTTP layer's error type (see [`crate::client::ClientError`]).
pub trait RetryableError: std::fmt::Display {
    /// Whether the failure is transient (rate limits, 5xx, dropped connections).
    fn is_retryable(&self) -> bool;

    /// Response headers of the failed attempt, if any.
    fn response_headers(&self) -> Option<&HashMap<String, String>> {
        None
    }

    /// The error returned when retrying is cancelled.
    fn cancelled() -> Self
    where
        Self: Sized;
}

/// Where a retry delay came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelaySource {
    HeaderMs,
    HeaderSeconds,
    HeaderHttpDate,
    Exponential,
}

/// A scheduled retry, reported to the `on_retry` observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryAttempt {
    /// 0-indexed retry number
    pub attempt: u32,
    pub last_error: String,
    pub source: DelaySource,
    pub delay: Duration,
}

fn header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.trim())
}

fn parse_finite(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Delay requested by rate-limit headers, if present and either within
/// `ceiling` or shorter than `exponential`.
pub fn header_delay(
    headers: &HashMap<String, String>,
    now: DateTime<Utc>,
    ceiling: Duration,
    exponential: Duration,
) -> Option<(Duration, DelaySource)> {
    let (ms, source) = if let Some(ms) = header(headers, "retry-after-ms").and_then(parse_finite) {
        (ms, DelaySource::HeaderMs)
    } else {
        let value = header(headers, "retry-after")?;
        if let Some(seconds) = parse_finite(value) {
            (seconds * 1000.0, DelaySource::HeaderSeconds)
        } else {
            let date = DateTime::parse_from_rfc2822(value).ok()?;
            let ms = date.with_timezone(&Utc).signed_duration_since(now).num_milliseconds();
            (ms as f64, DelaySource::HeaderHttpDate)
        }
    };

    let within_ceiling = ms <= ceiling.as_millis() as f64;
    let below_backoff = ms < exponential.as_millis() as f64;
    if ms < 0.0 || !(within_ceiling || below_backoff) {
        debug!(delay_ms = ms, source = ?source, "Ignoring unreasonable retry header");
        return None;
    }

    Some((Duration::from_millis(ms as u64), source))
}

/// Rate-limit-aware exponential backoff around a fallible async operation.
///
/// # Example
/// ```no_run
/// use std::time::Duration;
/// use unai::options::RetryOptions;
/// use unai::retry::RetryPolicy;
/// # use unai::ClientError;
/// # async fn send() -> Result<String, ClientError> { Ok(String::new()) }
///
/// # async fn run() -> Result<(), ClientError> {
/// let policy = RetryPolicy::new(
///     RetryOptions::default().with_initial_delay(Duration::from_millis(250)),
/// );
/// let body = policy.call(|| send()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct RetryPolicy {
    options: RetryOptions,
    cancellation: Option<CancellationToken>,
    on_retry: Option<Arc<dyn Fn(&RetryAttempt) + Send + Sync>>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("options", &self.options)
            .field("cancellation", &self.cancellation)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    pub fn new(options: RetryOptions) -> Self {
        Self {
            options,
            cancellation: None,
            on_retry: None,
        }
    }

    /// Cancel pending retries (and the wait between them) through `token`.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Observe every scheduled retry.
    pub fn with_on_retry(mut self, f: impl Fn(&RetryAttempt) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(f));
        self
    }

    pub fn options(&self) -> &RetryOptions {
        &self.options
    }

    fn exponential_delay(&self, attempt: u32) -> Duration {
        self.options
            .initial_delay
            .saturating_mul(self.options.backoff_factor.saturating_pow(attempt))
    }

    fn delay_for<E: RetryableError>(&self, attempt: u32, error: &E) -> (Duration, DelaySource) {
        let exponential = self.exponential_delay(attempt);
        error
            .response_headers()
            .and_then(|headers| {
                header_delay(headers, Utc::now(), self.options.max_header_delay, exponential)
            })
            .unwrap_or((exponential, DelaySource::Exponential))
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Sleeps for `delay`. Returns `false` if cancelled first.
    async fn sleep(&self, delay: Duration) -> bool {
        match &self.cancellation {
            Some(token) => tokio::select! {
                _ = token.cancelled() => false,
                _ = tokio::time::sleep(delay) => true,
            },
            None => {
                tokio::time::sleep(delay).await;
                true
            }
        }
    }

    /// Run `operation`, retrying retryable failures.
    ///
    /// The last error is returned unchanged once retries are exhausted;
    /// non-retryable errors are returned on first occurrence.
    pub async fn call<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError,
    {
        let mut attempt = 0;

        loop {
            if self.is_cancelled() {
                return Err(E::cancelled());
            }

            let error = match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(retries = attempt, "Operation recovered after retries");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !error.is_retryable() {
                debug!(error = %error, "Non-retryable error, giving up");
                return Err(error);
            }

            if attempt >= self.options.max_retries {
                warn!(
                    attempts = attempt + 1,
                    error = %error,
                    "Retries exhausted"
                );
                return Err(error);
            }

            let (delay, source) = self.delay_for(attempt, &error);
            warn!(
                attempt = attempt + 1,
                max_retries = self.options.max_retries,
                delay_ms = delay.as_millis() as u64,
                source = ?source,
                error = %error,
                "Retryable failure, backing off"
            );

            if let Some(on_retry) = &self.on_retry {
                on_retry(&RetryAttempt {
                    attempt,
                    last_error: error.to_string(),
                    source,
                    delay,
                });
            }

            if !self.sleep(delay).await {
                debug!("Retry cancelled during backoff");
                return Err(E::cancelled());
            }

            attempt += 1;
        }
    }
}

/// Retry `operation` up to `max_retries` times, starting at `initial_delay`.
pub async fn retry_with_exponential_backoff<F, Fut, T, E>(
    max_retries: u32,
    initial_delay: Duration,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError,
{
    let options = RetryOptions::default()
        .with_max_retries(max_retries)
        .with_initial_delay(initial_delay);
    RetryPolicy::new(options).call(operation).await
}

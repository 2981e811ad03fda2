//! Retry executor with exponential backoff
//!
//! Wraps one async operation and re-runs it while it fails with a retryable
//! error, up to the attempt budget. Delays grow as `base * 2^(attempt-1)`
//! plus random jitter, capped at `max_delay`. A retry-after hint from the
//! upstream replaces the computed delay (capped the same way).

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ErrorKind, ProviderError};

/// Backoff policy
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Fraction of the computed delay added as random jitter (0.0 - 1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Backoff for the retry following `attempt`, without jitter
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }

    /// Delay to wait before the retry following `attempt`
    ///
    /// An explicit `retry_after` hint wins over the computed backoff.
    pub fn delay_for_attempt(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(hint) = retry_after {
            return hint.min(self.max_delay);
        }

        let backoff = self.backoff_delay(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        let extra = backoff.mul_f64(jitter * rand::random::<f64>());
        (backoff + extra).min(self.max_delay)
    }
}

/// Serialisable form of [`RetryPolicy`] used in configuration files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetryPolicy::default().into()
    }
}

impl From<RetryPolicy> for RetrySettings {
    fn from(policy: RetryPolicy) -> Self {
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            jitter: policy.jitter,
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            jitter: settings.jitter,
        }
    }
}

/// A scheduled retry, reported to the `on_retry` callback before sleeping
#[derive(Debug, Clone)]
pub struct RetryEvent {
    /// The attempt that just failed (1-based)
    pub attempt: u32,
    /// How long the executor will wait before the next attempt
    pub delay: Duration,
    /// The failure that triggered the retry
    pub error: ProviderError,
}

/// Callback invoked for every scheduled retry
#[derive(Clone)]
pub struct RetryCallback(Arc<dyn Fn(&RetryEvent) + Send + Sync>);

impl RetryCallback {
    pub fn new(callback: impl Fn(&RetryEvent) + Send + Sync + 'static) -> Self {
        Self(Arc::new(callback))
    }

    pub fn call(&self, event: &RetryEvent) {
        (self.0)(event)
    }
}

impl fmt::Debug for RetryCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RetryCallback(..)")
    }
}

/// Per-call hooks: cancellation and retry notification
#[derive(Debug, Clone, Default)]
pub struct RetryHooks {
    pub signal: Option<CancellationToken>,
    pub on_retry: Option<RetryCallback>,
}

impl RetryHooks {
    pub fn is_cancelled(&self) -> bool {
        self.signal
            .as_ref()
            .map(CancellationToken::is_cancelled)
            .unwrap_or(false)
    }

    /// Run `fut` until it finishes or the signal fires
    ///
    /// A fired signal drops the in-flight future, which aborts any HTTP
    /// request it owns.
    pub async fn race<T, Fut>(&self, fut: Fut) -> Result<T, ProviderError>
    where
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        match &self.signal {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(ProviderError::aborted()),
                    result = fut => result,
                }
            }
            None => fut.await,
        }
    }
}

/// Whether a failure is worth another attempt
pub fn is_retryable(error: &ProviderError) -> bool {
    match error.kind {
        ErrorKind::Aborted | ErrorKind::QuotaExceeded | ErrorKind::Authentication => false,
        ErrorKind::RateLimitExceeded
        | ErrorKind::ServiceUnavailable
        | ErrorKind::Network
        | ErrorKind::Timeout => true,
        _ => matches!(error.status, Some(status) if status == 429 || status >= 500),
    }
}

/// Run `operation` with retries according to `policy`
///
/// Returns the first success. Once the budget is exhausted, or on the first
/// non-retryable failure, the operation's own error is returned unchanged.
/// A fired cancellation signal ends the loop with an `Aborted` error, both
/// while the operation runs and while waiting between attempts.
pub async fn execute_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    hooks: &RetryHooks,
    mut operation: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        if hooks.is_cancelled() {
            return Err(ProviderError::aborted());
        }

        match hooks.race(operation()).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => {
                if attempt >= max_attempts || !is_retryable(&error) {
                    return Err(error);
                }

                let delay = policy.delay_for_attempt(attempt, error.retry_after);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying after failure"
                );

                let event = RetryEvent {
                    attempt,
                    delay,
                    error,
                };
                if let Some(callback) = &hooks.on_retry {
                    callback.call(&event);
                }

                hooks
                    .race(async {
                        tokio::time::sleep(delay).await;
                        Ok(())
                    })
                    .await?;
                attempt += 1;
            }
        }
    }
}

/// Read `retry-after-ms` or `retry-after` (seconds or HTTP date)
pub fn retry_after_from_headers(headers: &HeaderMap) -> Option<Duration> {
    if let Some(ms) = header_str(headers, "retry-after-ms").and_then(|v| v.parse::<u64>().ok()) {
        return Some(Duration::from_millis(ms));
    }

    let value = header_str(headers, "retry-after")?;
    if let Ok(seconds) = value.parse::<f64>() {
        if seconds.is_finite() && seconds >= 0.0 {
            return Some(Duration::from_secs_f64(seconds));
        }
    }

    httpdate::parse_http_date(value)
        .ok()
        .map(|at| at.duration_since(SystemTime::now()).unwrap_or_default())
}

/// Read a `retryDelay` such as `"30s"` from a Google-style error body
pub fn retry_delay_from_body(body: &str) -> Option<Duration> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let details = value.pointer("/error/details")?.as_array()?;
    details
        .iter()
        .filter_map(|detail| detail.get("retryDelay")?.as_str())
        .find_map(parse_duration_secs)
}

fn parse_duration_secs(value: &str) -> Option<Duration> {
    let seconds = value.trim().strip_suffix('s')?.parse::<f64>().ok()?;
    (seconds.is_finite() && seconds >= 0.0).then(|| Duration::from_secs_f64(seconds))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok().map(str::trim)
}

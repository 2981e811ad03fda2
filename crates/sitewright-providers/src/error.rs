//! Error types for the providers module
//!
//! Every failure crossing a provider boundary is a [`ProviderError`]: a kind
//! from a closed set, the provider that produced it, the HTTP status when one
//! was received, and an optional provider-specific hint for the user.

use std::fmt;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::ProviderKind;
use crate::retry;

static QUOTA_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)quota|billing|insufficient_quota|credit balance|resource[_ ]exhausted")
        .expect("quota pattern is valid")
});

// Hard exhaustion markers in a 429 body; Gemini's per-minute RESOURCE_EXHAUSTED
// also mentions quota and is an ordinary rate limit.
static EXHAUSTED_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)insufficient_quota|exceeded your current quota|billing|credit balance")
        .expect("exhaustion pattern is valid")
});

static RATE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)rate[ _-]?limit|too many requests|overloaded")
        .expect("rate limit pattern is valid")
});

static TIMEOUT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)timed? ?out|deadline exceeded").expect("timeout pattern is valid")
});

static NETWORK_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)network|connection (reset|refused|closed)|econnreset|econnrefused|fetch failed|dns|socket hang up",
    )
    .expect("network pattern is valid")
});

static SAFETY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)safety|content[ _]policy|content_filter|blocked|harm[_ ]category")
        .expect("safety pattern is valid")
});

/// Classification of a provider failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Bad or missing credential
    Authentication,
    /// Upstream asked us to slow down
    RateLimitExceeded,
    /// Account quota or billing limit reached
    QuotaExceeded,
    /// Request or output blocked by a safety filter
    ContentPolicyViolation,
    /// Upstream reported a server-side failure
    ServiceUnavailable,
    /// Connection could not be established or was interrupted
    Network,
    /// Request exceeded its time budget
    Timeout,
    /// Malformed request, unknown model, content too large
    InvalidRequest,
    /// Caller cancelled the request
    Aborted,
    /// Provider missing, unknown or lacking credentials
    NotConfigured,
    /// Upstream answered with something we could not decode
    Parse,
    /// Anything else
    Unknown,
}

impl ErrorKind {
    /// Short label used in messages
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Authentication => "Authentication failed",
            ErrorKind::RateLimitExceeded => "Rate limit exceeded",
            ErrorKind::QuotaExceeded => "Quota exceeded",
            ErrorKind::ContentPolicyViolation => "Content policy violation",
            ErrorKind::ServiceUnavailable => "Service unavailable",
            ErrorKind::Network => "Network error",
            ErrorKind::Timeout => "Request timed out",
            ErrorKind::InvalidRequest => "Invalid request",
            ErrorKind::Aborted => "Request aborted",
            ErrorKind::NotConfigured => "Provider not configured",
            ErrorKind::Parse => "Unexpected response",
            ErrorKind::Unknown => "Provider error",
        }
    }

    /// Generic remedy shown when the provider did not supply a hint
    pub fn remedy(&self) -> &'static str {
        match self {
            ErrorKind::Authentication => {
                "Check that your API key is correct and still active, then try again."
            }
            ErrorKind::RateLimitExceeded => {
                "The provider is receiving too many requests. Wait a moment and try again."
            }
            ErrorKind::QuotaExceeded => {
                "Your usage quota is exhausted. Check your plan and billing details, or switch to another provider."
            }
            ErrorKind::ContentPolicyViolation => {
                "The request was blocked by the provider's safety filter. Rephrase your request and try again."
            }
            ErrorKind::ServiceUnavailable => {
                "The provider is temporarily unavailable. Wait a moment and try again."
            }
            ErrorKind::Network => "Check your internet connection and try again.",
            ErrorKind::Timeout => {
                "The provider took too long to respond. Try again, or reduce the size of your request."
            }
            ErrorKind::InvalidRequest => {
                "The request was rejected. Try reducing the content size or simplifying the request."
            }
            ErrorKind::Aborted => "The request was cancelled.",
            ErrorKind::NotConfigured => {
                "Add an API key for at least one provider, then try again."
            }
            ErrorKind::Parse => "The provider returned an unexpected response. Try again.",
            ErrorKind::Unknown => "Something went wrong. Try again in a moment.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Uniform error for all provider operations
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderError {
    /// Classification driving retry and fallback decisions
    pub kind: ErrorKind,
    /// Provider that produced the error
    pub provider: Option<ProviderKind>,
    /// HTTP status, when a response was received
    pub status: Option<u16>,
    /// Human-readable message (never includes credentials)
    pub message: String,
    /// Provider-specific guidance for common failures
    pub hint: Option<String>,
    /// Delay the upstream asked for before retrying
    pub retry_after: Option<Duration>,
}

impl ProviderError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            provider: None,
            status: None,
            message: message.into(),
            hint: None,
            retry_after: None,
        }
    }

    pub fn aborted() -> Self {
        Self::new(ErrorKind::Aborted, "Request was aborted")
    }

    pub fn not_configured(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotConfigured, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse, message)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("No response within {} seconds", after.as_secs()),
        )
    }

    /// Classify a failed HTTP response
    ///
    /// `body` is the raw response body; when it is JSON the upstream's own
    /// error message is extracted from it.
    pub fn from_status(status: u16, body: &str) -> Self {
        Self::classify(status, body, retry::retry_delay_from_body(body))
    }

    /// A 429 is quota exhaustion only on an explicit marker and without a
    /// retry hint; the upstream asking to come back later is a rate limit.
    fn classify(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        let message = extract_error_message(body)
            .unwrap_or_else(|| format!("HTTP {}", status));

        let kind = match status {
            401 | 403 => ErrorKind::Authentication,
            429 if retry_after.is_none() && EXHAUSTED_PATTERN.is_match(body) => {
                ErrorKind::QuotaExceeded
            }
            429 => ErrorKind::RateLimitExceeded,
            408 => ErrorKind::Timeout,
            400 | 404 | 409 | 413 | 422 if SAFETY_PATTERN.is_match(body) => {
                ErrorKind::ContentPolicyViolation
            }
            400 | 404 | 409 | 413 | 422 => ErrorKind::InvalidRequest,
            500..=599 => ErrorKind::ServiceUnavailable,
            _ => ErrorKind::Unknown,
        };

        Self {
            kind,
            provider: None,
            status: Some(status),
            message,
            hint: None,
            retry_after,
        }
    }

    /// Classify a failed HTTP response, consuming its body
    ///
    /// Picks up retry-after hints from headers and from Google-style
    /// `retryDelay` body fields.
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let header_hint = retry::retry_after_from_headers(response.headers());
        let body = response.text().await.unwrap_or_default();
        let retry_after = header_hint.or_else(|| retry::retry_delay_from_body(&body));
        Self::classify(status, &body, retry_after)
    }

    /// Classify an error that carries only a message
    ///
    /// Used for failures that never produced an HTTP status, such as transport
    /// errors or error events inside a stream.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = if QUOTA_PATTERN.is_match(&message) {
            ErrorKind::QuotaExceeded
        } else if RATE_PATTERN.is_match(&message) {
            ErrorKind::RateLimitExceeded
        } else if TIMEOUT_PATTERN.is_match(&message) {
            ErrorKind::Timeout
        } else if NETWORK_PATTERN.is_match(&message) {
            ErrorKind::Network
        } else if SAFETY_PATTERN.is_match(&message) {
            ErrorKind::ContentPolicyViolation
        } else {
            ErrorKind::Unknown
        };
        Self::new(kind, message)
    }

    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Attach the provider and its hint, unless already present
    pub fn annotate(mut self, provider: ProviderKind, hint: Option<&str>) -> Self {
        if self.provider.is_none() {
            self.provider = Some(provider);
        }
        if self.hint.is_none() {
            self.hint = hint.map(str::to_string);
        }
        self
    }

    pub fn is_aborted(&self) -> bool {
        self.kind == ErrorKind::Aborted
    }

    /// Suggested remedy: the provider hint if present, else the generic one
    pub fn remedy(&self) -> &str {
        self.hint.as_deref().unwrap_or_else(|| self.kind.remedy())
    }

    /// Message suitable for showing to the user
    pub fn user_message(&self) -> String {
        format!("{}\n\n{}", self, self.remedy())
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(provider) = self.provider {
            write!(f, "[{}] ", provider)?;
        }
        write!(f, "{}", self.kind)?;
        if let Some(status) = self.status {
            write!(f, " ({})", status)?;
        }
        write!(f, ": {}", self.message)
    }
}

impl std::error::Error for ProviderError {}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::parse(err.to_string())
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::new(ErrorKind::Timeout, err.to_string())
        } else if err.is_connect() {
            ProviderError::new(ErrorKind::Network, err.to_string())
        } else if err.is_decode() {
            ProviderError::parse(err.to_string())
        } else if let Some(status) = err.status() {
            ProviderError::from_status(status.as_u16(), &err.to_string())
        } else if err.is_request() || err.is_body() {
            ProviderError::new(ErrorKind::Network, err.to_string())
        } else {
            ProviderError::from_message(err.to_string())
        }
    }
}

/// Pull the upstream's message out of a JSON error body
///
/// Understands `{"error": {"message": ..}}`, `{"error": ".."}` and
/// `{"message": ..}`. Non-JSON bodies are returned trimmed and truncated.
fn extract_error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        let candidate = value
            .pointer("/error/message")
            .or_else(|| value.get("error").filter(|e| e.is_string()))
            .or_else(|| value.get("message"))
            .and_then(|v| v.as_str());
        if let Some(message) = candidate {
            return Some(message.to_string());
        }
    }

    const MAX_LEN: usize = 300;
    if trimmed.chars().count() > MAX_LEN {
        Some(format!("{}…", trimmed.chars().take(MAX_LEN).collect::<String>()))
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(ProviderError::from_status(401, "").kind, ErrorKind::Authentication);
        assert_eq!(ProviderError::from_status(403, "").kind, ErrorKind::Authentication);
        assert_eq!(ProviderError::from_status(429, "").kind, ErrorKind::RateLimitExceeded);
        assert_eq!(ProviderError::from_status(400, "bad").kind, ErrorKind::InvalidRequest);
        assert_eq!(ProviderError::from_status(503, "").kind, ErrorKind::ServiceUnavailable);
        assert_eq!(ProviderError::from_status(418, "").kind, ErrorKind::Unknown);
    }

    #[test]
    fn test_quota_body_on_429() {
        let body = r#"{"error":{"message":"You exceeded your current quota","type":"insufficient_quota"}}"#;
        let err = ProviderError::from_status(429, body);
        assert_eq!(err.kind, ErrorKind::QuotaExceeded);
        assert_eq!(err.message, "You exceeded your current quota");
    }

    #[test]
    fn test_gemini_resource_exhausted_with_retry_info_is_rate_limit() {
        let body = r#"{"error":{"code":429,"message":"Resource has been exhausted (e.g. check quota).","status":"RESOURCE_EXHAUSTED",
            "details":[{"@type":"type.googleapis.com/google.rpc.RetryInfo","retryDelay":"2s"}]}}"#;
        let err = ProviderError::from_status(429, body);
        assert_eq!(err.kind, ErrorKind::RateLimitExceeded);
        assert_eq!(err.retry_after, Some(Duration::from_secs(2)));
        assert!(retry::is_retryable(&err));
    }

    #[test]
    fn test_exhaustion_marker_with_retry_hint_is_rate_limit() {
        let body = r#"{"error":{"message":"You exceeded your current quota","type":"insufficient_quota"}}"#;
        let err = ProviderError::classify(429, body, Some(Duration::from_secs(1)));
        assert_eq!(err.kind, ErrorKind::RateLimitExceeded);
    }

    #[test]
    fn test_safety_body_on_400() {
        let body = r#"{"error":{"message":"Request blocked by safety settings"}}"#;
        assert_eq!(
            ProviderError::from_status(400, body).kind,
            ErrorKind::ContentPolicyViolation
        );
    }

    #[test]
    fn test_message_classification() {
        assert_eq!(
            ProviderError::from_message("connection reset by peer").kind,
            ErrorKind::Network
        );
        assert_eq!(
            ProviderError::from_message("operation timed out").kind,
            ErrorKind::Timeout
        );
        assert_eq!(
            ProviderError::from_message("Rate limit reached for requests").kind,
            ErrorKind::RateLimitExceeded
        );
        assert_eq!(
            ProviderError::from_message("monthly quota used up").kind,
            ErrorKind::QuotaExceeded
        );
        assert_eq!(ProviderError::from_message("boom").kind, ErrorKind::Unknown);
    }

    #[test]
    fn test_display_and_remedy() {
        let err = ProviderError::from_status(401, r#"{"message":"invalid key"}"#)
            .annotate(ProviderKind::OpenAi, Some("Check your OpenAI API key."));
        assert_eq!(
            err.to_string(),
            "[openai] Authentication failed (401): invalid key"
        );
        assert_eq!(err.remedy(), "Check your OpenAI API key.");
        assert!(err.user_message().contains("Check your OpenAI API key."));
    }

    #[test]
    fn test_annotate_keeps_existing_hint() {
        let err = ProviderError::from_status(429, "")
            .with_hint("first")
            .annotate(ProviderKind::Cohere, Some("second"));
        assert_eq!(err.hint.as_deref(), Some("first"));
        assert_eq!(err.provider, Some(ProviderKind::Cohere));
    }

    #[test]
    fn test_long_plain_body_is_truncated() {
        let body = "x".repeat(1000);
        let err = ProviderError::from_status(500, &body);
        assert!(err.message.chars().count() <= 301);
    }
}

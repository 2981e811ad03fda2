//! Shared HTTP plumbing for the upstream clients

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::api_key::CredentialResolver;
use crate::error::{ErrorKind, ProviderError};
use crate::models::ProviderKind;
use crate::options::GenerateOptions;
use crate::retry::{execute_with_retry, RetryPolicy};

/// Maps an error kind to a provider-specific hint
pub(crate) type HintFn = fn(ErrorKind) -> Option<&'static str>;

/// Connection details shared by every adapter
#[derive(Debug, Clone)]
pub(crate) struct Endpoint {
    pub kind: ProviderKind,
    pub http: Client,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub credentials: CredentialResolver,
    pub hint: HintFn,
}

impl Endpoint {
    /// URL under the base, with exactly one slash between them
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn model<'a>(&'a self, options: &'a GenerateOptions) -> &'a str {
        options
            .model
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(&self.model)
    }

    pub fn has_credential(&self) -> bool {
        self.credentials.has_credential(self.kind)
    }

    /// Credential looked up at request time
    pub fn api_key(&self) -> Result<String, ProviderError> {
        self.credentials.resolve(self.kind).ok_or_else(|| {
            self.annotate(ProviderError::not_configured(format!(
                "No API key found for {}",
                self.kind.display_name()
            )))
        })
    }

    pub fn annotate(&self, error: ProviderError) -> ProviderError {
        let hint = (self.hint)(error.kind);
        error.annotate(self.kind, hint)
    }

    async fn with_timeout<T>(
        &self,
        fut: impl Future<Output = Result<T, ProviderError>>,
    ) -> Result<T, ProviderError> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .unwrap_or_else(|_| Err(ProviderError::timeout(self.timeout)))
    }

    async fn send_checked(&self, request: RequestBuilder) -> Result<Response, ProviderError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            debug!(provider = %self.kind, status = status.as_u16(), "Upstream returned error status");
            Err(ProviderError::from_response(response).await)
        }
    }

    /// Send a request and decode its JSON body, with retries
    ///
    /// `build` is called once per attempt.
    pub async fn execute_json<T, F>(
        &self,
        options: &GenerateOptions,
        build: F,
    ) -> Result<T, ProviderError>
    where
        T: DeserializeOwned,
        F: Fn() -> Result<RequestBuilder, ProviderError>,
    {
        let policy = options.retry_policy(&self.retry);
        let hooks = options.retry_hooks();
        let build = &build;

        execute_with_retry(&policy, &hooks, move || async move {
            let request = build()?;
            self.with_timeout(async {
                let response = self.send_checked(request).await?;
                let body = response.text().await?;
                serde_json::from_str::<T>(&body).map_err(ProviderError::from)
            })
            .await
            .map_err(|e| self.annotate(e))
        })
        .await
    }

    /// Send a request and return the response once headers arrive, with retries
    ///
    /// The timeout covers only the wait for the response head, so long
    /// streams are not cut off.
    pub async fn execute_stream<F>(
        &self,
        options: &GenerateOptions,
        build: F,
    ) -> Result<Response, ProviderError>
    where
        F: Fn() -> Result<RequestBuilder, ProviderError>,
    {
        let policy = options.retry_policy(&self.retry);
        let hooks = options.retry_hooks();
        let build = &build;

        execute_with_retry(&policy, &hooks, move || async move {
            let request = build()?;
            self.with_timeout(self.send_checked(request))
                .await
                .map_err(|e| self.annotate(e))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_key::StaticCredentialSource;

    fn endpoint(base_url: &str) -> Endpoint {
        Endpoint {
            kind: ProviderKind::OpenAi,
            http: Client::new(),
            base_url: base_url.to_string(),
            model: "default-model".to_string(),
            timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            credentials: CredentialResolver::new(),
            hint: |_| Some("hint"),
        }
    }

    #[test]
    fn test_url_joining() {
        assert_eq!(endpoint("http://x/v1/").url("/chat"), "http://x/v1/chat");
        assert_eq!(endpoint("http://x/v1").url("chat"), "http://x/v1/chat");
    }

    #[test]
    fn test_model_override() {
        let ep = endpoint("http://x");
        assert_eq!(ep.model(&GenerateOptions::new()), "default-model");
        assert_eq!(ep.model(&GenerateOptions::new().with_model("other")), "other");
        assert_eq!(ep.model(&GenerateOptions::new().with_model(" ")), "default-model");
    }

    #[test]
    fn test_missing_key_is_not_configured() {
        let err = endpoint("http://x").api_key().unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotConfigured);
        assert_eq!(err.provider, Some(ProviderKind::OpenAi));
        assert_eq!(err.hint.as_deref(), Some("hint"));
    }

    #[test]
    fn test_key_resolved_at_request_time() {
        let mut ep = endpoint("http://x");
        ep.credentials = CredentialResolver::new()
            .with_source(StaticCredentialSource::new("test").with_key(ProviderKind::OpenAi, "k"));
        assert_eq!(ep.api_key().unwrap(), "k");
    }
}

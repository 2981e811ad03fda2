//! Upstream client implementations
//!
//! One client per [`ProviderKind`], chosen by [`create_provider`].

use std::sync::Arc;

use reqwest::Client;
use tracing::debug;

use crate::api_key::CredentialResolver;
use crate::config::ProvidersConfig;
use crate::error::ProviderError;
use crate::models::ProviderKind;
use crate::provider::{Provider, ProviderFactory};

pub mod anthropic;
pub mod cohere;
pub mod google;
mod http;
pub mod openai;
pub mod proxy;

pub use anthropic::AnthropicProvider;
pub use cohere::CohereProvider;
pub use google::GoogleProvider;
pub use openai::OpenAiProvider;
pub use proxy::ProxyProvider;

use http::Endpoint;

/// Everything a client needs at construction
#[derive(Debug, Clone)]
pub struct ProviderContext {
    pub config: ProvidersConfig,
    pub credentials: CredentialResolver,
    pub http: Client,
}

impl ProviderContext {
    pub fn new(config: ProvidersConfig, credentials: CredentialResolver) -> Self {
        Self {
            config,
            credentials,
            http: Client::new(),
        }
    }

    pub fn with_http_client(mut self, http: Client) -> Self {
        self.http = http;
        self
    }

    fn endpoint(
        &self,
        kind: ProviderKind,
        default_base_url: &str,
        default_model: &str,
        hint: http::HintFn,
    ) -> Endpoint {
        let settings = self.config.provider(kind);
        Endpoint {
            kind,
            http: self.http.clone(),
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| default_base_url.to_string()),
            model: settings
                .model
                .clone()
                .unwrap_or_else(|| default_model.to_string()),
            timeout: settings.timeout(),
            retry: self.config.retry_policy(),
            credentials: self.credentials.clone(),
            hint,
        }
    }
}

/// Build the client for `kind`
///
/// Fails with `NotConfigured` when the provider has no credential. The
/// relay is the exception: it only needs a URL, and a missing token is
/// left for the relay to reject at request time.
pub fn create_provider(
    kind: ProviderKind,
    context: &ProviderContext,
) -> Result<Arc<dyn Provider>, ProviderError> {
    let provider: Arc<dyn Provider> = match kind {
        ProviderKind::Google => Arc::new(GoogleProvider::new(context.endpoint(
            kind,
            google::DEFAULT_BASE_URL,
            google::DEFAULT_MODEL,
            google::hint,
        ))?),
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(context.endpoint(
            kind,
            openai::DEFAULT_BASE_URL,
            openai::DEFAULT_MODEL,
            openai::hint,
        ))?),
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(context.endpoint(
            kind,
            anthropic::DEFAULT_BASE_URL,
            anthropic::DEFAULT_MODEL,
            anthropic::hint,
        ))?),
        ProviderKind::Cohere => Arc::new(CohereProvider::new(context.endpoint(
            kind,
            cohere::DEFAULT_BASE_URL,
            cohere::DEFAULT_MODEL,
            cohere::hint,
        ))?),
        ProviderKind::Proxy => {
            let url = context.config.proxy_url().ok_or_else(|| {
                ProviderError::not_configured("No relay URL configured")
                    .with_provider(ProviderKind::Proxy)
                    .with_hint("Set proxy.url in config.yaml or SITEWRIGHT_PROXY_URL.")
            })?;
            Arc::new(ProxyProvider::new(
                context.endpoint(kind, &url, proxy::DEFAULT_MODEL, proxy::hint),
            ))
        }
    };

    debug!(provider = %kind, model = provider.default_model(), "Created provider client");
    Ok(provider)
}

/// Factory producing the real HTTP clients
#[derive(Debug, Clone)]
pub struct HttpProviderFactory {
    context: ProviderContext,
}

impl HttpProviderFactory {
    pub fn new(context: ProviderContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &ProviderContext {
        &self.context
    }
}

impl ProviderFactory for HttpProviderFactory {
    fn create(&self, kind: ProviderKind) -> Result<Arc<dyn Provider>, ProviderError> {
        create_provider(kind, &self.context)
    }
}

/// Error for a client constructed without its credential
fn missing_key(endpoint: &Endpoint) -> ProviderError {
    endpoint.annotate(ProviderError::not_configured(format!(
        "{} API key is required",
        endpoint.kind.display_name()
    )))
}

//! Local relay provider
//!
//! Forwards requests to a relay exposing `POST /generate` (JSON
//! `GenerateResult`) and `POST /stream` (newline-delimited `StreamChunk`s).
//! The relay holds upstream credentials itself; a token is sent when one is
//! configured and otherwise left for the relay to demand.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Response;
use serde::Serialize;
use tracing::debug;

use super::http::Endpoint;
use crate::error::{ErrorKind, ProviderError};
use crate::models::{GenerateResult, Message, ProviderKind, StreamChunk};
use crate::options::GenerateOptions;
use crate::provider::Provider;
use crate::streaming::{ndjson_lines, with_cancellation, ChunkStream};

/// Sent as the model when neither config nor request names one
pub const DEFAULT_MODEL: &str = "default";

pub(crate) fn hint(kind: ErrorKind) -> Option<&'static str> {
    match kind {
        ErrorKind::Authentication => Some(
            "The relay rejected the request. Set SITEWRIGHT_PROXY_TOKEN or `sitewright keys set proxy`.",
        ),
        ErrorKind::Network => Some("Could not reach the relay. Check that it is running and proxy.url is correct."),
        ErrorKind::RateLimitExceeded => Some("The relay is rate limiting requests. Wait a moment and retry."),
        _ => None,
    }
}

/// Relay provider implementation
pub struct ProxyProvider {
    endpoint: Endpoint,
}

impl ProxyProvider {
    pub(crate) fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }

    fn build_request<'a>(&'a self, messages: &'a [Message], options: &'a GenerateOptions) -> RelayRequest<'a> {
        RelayRequest {
            messages,
            model: self.endpoint.model(options),
            system_instruction: options.system_instruction.as_deref(),
            temperature: options.effective_temperature(),
            max_output_tokens: options.max_output_tokens,
            thinking_budget_tokens: options.thinking_budget_tokens,
        }
    }

    fn request(&self, url: &str, body: &RelayRequest<'_>) -> Result<reqwest::RequestBuilder, ProviderError> {
        let request = self.endpoint.http.post(url).json(body);
        Ok(match self.endpoint.credentials.resolve(ProviderKind::Proxy) {
            Some(token) => request.bearer_auth(token),
            None => request,
        })
    }

    fn decode_stream(&self, response: Response) -> ChunkStream {
        let endpoint = self.endpoint.clone();
        Box::pin(async_stream::try_stream! {
            let mut lines = Box::pin(ndjson_lines(response.bytes_stream()));
            let mut finished = false;

            while let Some(line) = lines.next().await {
                let line = line.map_err(|e| endpoint.annotate(e))?;
                let chunk: StreamChunk = serde_json::from_str(&line)
                    .map_err(|e| endpoint.annotate(e.into()))?;
                let done = chunk.done;
                yield chunk;
                if done {
                    finished = true;
                    break;
                }
            }

            if !finished {
                yield StreamChunk::done(None);
            }
        })
    }
}

#[async_trait]
impl Provider for ProxyProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Proxy
    }

    fn default_model(&self) -> &str {
        &self.endpoint.model
    }

    /// Available whenever a relay URL is configured
    fn is_available(&self) -> bool {
        !self.endpoint.base_url.trim().is_empty()
    }

    async fn generate(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<GenerateResult, ProviderError> {
        let body = self.build_request(messages, options);
        let url = self.endpoint.url("generate");

        debug!(provider = "proxy", url = %url, "Sending generate request");
        let mut result: GenerateResult = self
            .endpoint
            .execute_json(options, || self.request(&url, &body))
            .await?;

        if result.model.is_empty() {
            result.model = body.model.to_string();
        }
        result.provider = Some(ProviderKind::Proxy);
        Ok(result)
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<ChunkStream, ProviderError> {
        let body = self.build_request(messages, options);
        let url = self.endpoint.url("stream");

        debug!(provider = "proxy", url = %url, "Sending stream request");
        let response = self
            .endpoint
            .execute_stream(options, || self.request(&url, &body))
            .await?;

        Ok(with_cancellation(
            self.decode_stream(response),
            options.signal.clone(),
        ))
    }
}

#[derive(Debug, Serialize)]
struct RelayRequest<'a> {
    messages: &'a [Message],
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<&'a str>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_budget_tokens: Option<u32>,
}

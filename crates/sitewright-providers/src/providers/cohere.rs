//! Cohere provider implementation
//!
//! Uses the v2 chat API. Streamed events are typed; text arrives in
//! `content-delta` events and usage in the closing `message-end`.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Response;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::http::Endpoint;
use super::missing_key;
use crate::error::{ErrorKind, ProviderError};
use crate::models::{FinishReason, GenerateResult, Message, ProviderKind, StreamChunk, TokenUsage};
use crate::options::GenerateOptions;
use crate::provider::Provider;
use crate::streaming::{sse_events, with_cancellation, ChunkStream};

pub const DEFAULT_BASE_URL: &str = "https://api.cohere.com/v2";
pub const DEFAULT_MODEL: &str = "command-r-plus";

pub(crate) fn hint(kind: ErrorKind) -> Option<&'static str> {
    match kind {
        ErrorKind::Authentication => Some(
            "Check your Cohere API key (COHERE_API_KEY or `sitewright keys set cohere`).",
        ),
        ErrorKind::RateLimitExceeded => Some(
            "Cohere rate limit reached. Trial keys are heavily limited; wait or use a production key.",
        ),
        ErrorKind::InvalidRequest => {
            Some("Cohere rejected the request. Check the model name and shorten the prompt.")
        }
        ErrorKind::ContentPolicyViolation => {
            Some("Cohere blocked this content. Rephrase the request.")
        }
        _ => None,
    }
}

/// Cohere provider implementation
pub struct CohereProvider {
    endpoint: Endpoint,
}

impl CohereProvider {
    pub(crate) fn new(endpoint: Endpoint) -> Result<Self, ProviderError> {
        if !endpoint.has_credential() {
            return Err(missing_key(&endpoint));
        }
        Ok(Self { endpoint })
    }

    fn build_request(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
        stream: bool,
    ) -> CohereRequest {
        let mut wire = Vec::with_capacity(messages.len() + 1);
        if let Some(instruction) = &options.system_instruction {
            wire.push(CohereMessage {
                role: "system",
                content: instruction.clone(),
            });
        }
        wire.extend(messages.iter().map(|m| CohereMessage {
            role: m.role.as_str(),
            content: m.content.clone(),
        }));

        CohereRequest {
            model: self.endpoint.model(options).to_string(),
            messages: wire,
            temperature: options.effective_temperature(),
            max_tokens: options.max_output_tokens,
            stream,
        }
    }

    fn request(&self, url: &str, body: &CohereRequest) -> Result<reqwest::RequestBuilder, ProviderError> {
        let key = self.endpoint.api_key()?;
        Ok(self.endpoint.http.post(url).bearer_auth(key).json(body))
    }

    fn decode_stream(&self, response: Response) -> ChunkStream {
        let endpoint = self.endpoint.clone();
        Box::pin(async_stream::try_stream! {
            let mut events = Box::pin(sse_events(response.bytes_stream()));
            let mut usage = None;

            while let Some(event) = events.next().await {
                let event = event.map_err(|e| endpoint.annotate(e))?;
                let parsed: CohereStreamEvent = serde_json::from_str(&event.data)
                    .map_err(|e| endpoint.annotate(e.into()))?;

                match parsed.kind.as_str() {
                    "content-delta" => {
                        let text = parsed
                            .delta
                            .and_then(|d| d.message)
                            .and_then(|m| m.content)
                            .and_then(|c| c.text)
                            .unwrap_or_default();
                        if !text.is_empty() {
                            yield StreamChunk::text(text);
                        }
                    }
                    "message-end" => {
                        let delta = parsed.delta.unwrap_or_default();
                        if delta.finish_reason.as_deref() == Some("ERROR") {
                            let message = delta
                                .error
                                .unwrap_or_else(|| "Cohere stream ended with an error".to_string());
                            Err::<(), _>(endpoint.annotate(ProviderError::from_message(message)))?;
                        }
                        usage = delta.usage.map(|u| u.to_usage());
                        break;
                    }
                    _ => {}
                }
            }

            yield StreamChunk::done(usage);
        })
    }
}

fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "COMPLETE" | "STOP_SEQUENCE" => FinishReason::Stop,
        "MAX_TOKENS" => FinishReason::Length,
        "ERROR" => FinishReason::Error,
        _ => FinishReason::Other,
    }
}

#[async_trait]
impl Provider for CohereProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Cohere
    }

    fn default_model(&self) -> &str {
        &self.endpoint.model
    }

    fn is_available(&self) -> bool {
        self.endpoint.has_credential()
    }

    async fn generate(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<GenerateResult, ProviderError> {
        let body = self.build_request(messages, options, false);
        let url = self.endpoint.url("chat");

        debug!(provider = "cohere", model = %body.model, "Sending generate request");
        let response: CohereResponse = self
            .endpoint
            .execute_json(options, || self.request(&url, &body))
            .await?;

        let text: String = response
            .message
            .map(|m| {
                m.content
                    .into_iter()
                    .filter(|c| c.kind.as_deref().unwrap_or("text") == "text")
                    .filter_map(|c| c.text)
                    .collect()
            })
            .unwrap_or_default();

        Ok(GenerateResult {
            text,
            finish_reason: response
                .finish_reason
                .as_deref()
                .map(map_finish_reason)
                .unwrap_or_default(),
            usage: response.usage.map(|u| u.to_usage()).unwrap_or_default(),
            model: body.model,
            provider: Some(ProviderKind::Cohere),
        })
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<ChunkStream, ProviderError> {
        let body = self.build_request(messages, options, true);
        let url = self.endpoint.url("chat");

        debug!(provider = "cohere", model = %body.model, "Sending stream request");
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
struct CohereRequest {
    model: String,
    messages: Vec<CohereMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct CohereMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct CohereResponse {
    #[serde(default)]
    message: Option<CohereResponseMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
    #[serde(default)]
    usage: Option<CohereUsage>,
}

#[derive(Debug, Deserialize)]
struct CohereResponseMessage {
    #[serde(default)]
    content: Vec<CohereContent>,
}

#[derive(Debug, Deserialize)]
struct CohereContent {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CohereUsage {
    #[serde(default)]
    tokens: Option<CohereTokens>,
    #[serde(default)]
    billed_units: Option<CohereTokens>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct CohereTokens {
    #[serde(default)]
    input_tokens: f64,
    #[serde(default)]
    output_tokens: f64,
}

impl CohereUsage {
    fn to_usage(&self) -> TokenUsage {
        match self.tokens.or(self.billed_units) {
            Some(t) => TokenUsage::new(t.input_tokens as u32, t.output_tokens as u32),
            None => TokenUsage::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CohereStreamEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<CohereDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct CohereDelta {
    #[serde(default)]
    message: Option<CohereDeltaMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    usage: Option<CohereUsage>,
}

#[derive(Debug, Deserialize)]
struct CohereDeltaMessage {
    #[serde(default)]
    content: Option<CohereContent>,
}

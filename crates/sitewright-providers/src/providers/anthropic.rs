//! Anthropic provider implementation
//!
//! Uses the messages API. System text travels in the top-level `system`
//! field; streaming is a sequence of typed server-sent events.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Response;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::http::Endpoint;
use super::missing_key;
use crate::error::{ErrorKind, ProviderError};
use crate::models::{
    FinishReason, GenerateResult, Message, ProviderKind, Role, StreamChunk, TokenUsage,
};
use crate::options::GenerateOptions;
use crate::provider::Provider;
use crate::streaming::{sse_events, with_cancellation, ChunkStream};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";
pub const API_VERSION: &str = "2023-06-01";

const DEFAULT_MAX_TOKENS: u32 = 4096;
/// Output room kept on top of a thinking budget
const THINKING_HEADROOM: u32 = 1024;

pub(crate) fn hint(kind: ErrorKind) -> Option<&'static str> {
    match kind {
        ErrorKind::Authentication => Some(
            "Check your Anthropic API key (ANTHROPIC_API_KEY or `sitewright keys set anthropic`).",
        ),
        ErrorKind::RateLimitExceeded => {
            Some("Anthropic rate limit reached. Wait a moment before trying again.")
        }
        ErrorKind::QuotaExceeded => Some(
            "Your Anthropic credit balance is too low. Add credits in the Anthropic console.",
        ),
        ErrorKind::InvalidRequest => Some(
            "Anthropic rejected the request. Check the model name and reduce the conversation length.",
        ),
        ErrorKind::ContentPolicyViolation => {
            Some("Anthropic declined this request. Rephrase it and try again.")
        }
        ErrorKind::ServiceUnavailable => {
            Some("Anthropic is overloaded right now. Try again shortly.")
        }
        _ => None,
    }
}

/// Anthropic provider implementation
pub struct AnthropicProvider {
    endpoint: Endpoint,
}

impl AnthropicProvider {
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
    ) -> AnthropicRequest {
        let mut system: Vec<&str> = Vec::new();
        if let Some(instruction) = &options.system_instruction {
            system.push(instruction);
        }

        let mut wire = Vec::with_capacity(messages.len());
        for message in messages {
            match message.role {
                Role::System => system.push(&message.content),
                Role::User | Role::Assistant => wire.push(AnthropicMessage {
                    role: message.role.as_str(),
                    content: message.content.clone(),
                }),
            }
        }

        let requested = options.max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
        let thinking = options.thinking_budget_tokens.map(|budget_tokens| Thinking {
            kind: "enabled",
            budget_tokens,
        });
        let max_tokens = match &thinking {
            Some(t) => requested.max(t.budget_tokens + THINKING_HEADROOM),
            None => requested,
        };

        AnthropicRequest {
            model: self.endpoint.model(options).to_string(),
            max_tokens,
            system: (!system.is_empty()).then(|| system.join("\n\n")),
            messages: wire,
            // Extended thinking only accepts the default temperature
            temperature: thinking
                .is_none()
                .then(|| options.effective_temperature()),
            thinking,
            stream,
        }
    }

    fn request(
        &self,
        url: &str,
        body: &AnthropicRequest,
    ) -> Result<reqwest::RequestBuilder, ProviderError> {
        let key = self.endpoint.api_key()?;
        Ok(self
            .endpoint
            .http
            .post(url)
            .header("x-api-key", key)
            .header("anthropic-version", API_VERSION)
            .json(body))
    }

    fn decode_stream(&self, response: Response) -> ChunkStream {
        let endpoint = self.endpoint.clone();
        Box::pin(async_stream::try_stream! {
            let mut events = Box::pin(sse_events(response.bytes_stream()));
            let mut prompt_tokens = 0;
            let mut completion_tokens = 0;

            while let Some(event) = events.next().await {
                let event = event.map_err(|e| endpoint.annotate(e))?;
                let parsed = match serde_json::from_str::<StreamEvent>(&event.data) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        debug!("Failed to parse SSE event: {} - data: {}", e, event.data);
                        continue;
                    }
                };

                match parsed {
                    StreamEvent::MessageStart { message } => {
                        prompt_tokens = message.usage.input_tokens;
                        completion_tokens = message.usage.output_tokens;
                    }
                    StreamEvent::ContentBlockDelta { delta } => {
                        if let Some(text) = delta.text.filter(|t| !t.is_empty()) {
                            yield StreamChunk::text(text);
                        }
                    }
                    StreamEvent::MessageDelta { usage } => {
                        if let Some(usage) = usage {
                            completion_tokens = usage.output_tokens;
                        }
                    }
                    StreamEvent::MessageStop => break,
                    StreamEvent::Error { error } => {
                        Err::<(), _>(endpoint.annotate(stream_error(error)))?;
                    }
                    StreamEvent::Other => trace!("Ignoring Anthropic event"),
                }
            }

            yield StreamChunk::done(Some(TokenUsage::new(prompt_tokens, completion_tokens)));
        })
    }
}

fn stream_error(error: ApiError) -> ProviderError {
    let kind = match error.kind.as_str() {
        "overloaded_error" | "api_error" => ErrorKind::ServiceUnavailable,
        "rate_limit_error" => ErrorKind::RateLimitExceeded,
        "authentication_error" | "permission_error" => ErrorKind::Authentication,
        "invalid_request_error" | "not_found_error" | "request_too_large" => {
            ErrorKind::InvalidRequest
        }
        _ => return ProviderError::from_message(error.message),
    };
    ProviderError::new(kind, error.message)
}

fn map_stop_reason(reason: &str) -> FinishReason {
    match reason {
        "end_turn" | "stop_sequence" => FinishReason::Stop,
        "max_tokens" => FinishReason::Length,
        "refusal" => FinishReason::ContentFilter,
        _ => FinishReason::Other,
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
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
        let url = self.endpoint.url("messages");

        debug!(provider = "anthropic", model = %body.model, "Sending generate request");
        let response: AnthropicResponse = self
            .endpoint
            .execute_json(options, || self.request(&url, &body))
            .await?;

        let text: String = response
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect();

        Ok(GenerateResult {
            text,
            finish_reason: response
                .stop_reason
                .as_deref()
                .map(map_stop_reason)
                .unwrap_or_default(),
            usage: TokenUsage::new(response.usage.input_tokens, response.usage.output_tokens),
            model: response.model.unwrap_or(body.model),
            provider: Some(ProviderKind::Anthropic),
        })
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<ChunkStream, ProviderError> {
        let body = self.build_request(messages, options, true);
        let url = self.endpoint.url("messages");

        debug!(provider = "anthropic", model = %body.model, "Sending stream request");
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
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<Thinking>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct Thinking {
    #[serde(rename = "type")]
    kind: &'static str,
    budget_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart {
        message: StartMessage,
    },
    ContentBlockDelta {
        delta: Delta,
    },
    MessageDelta {
        #[serde(default)]
        usage: Option<AnthropicUsage>,
    },
    MessageStop,
    Error {
        error: ApiError,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct StartMessage {
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}

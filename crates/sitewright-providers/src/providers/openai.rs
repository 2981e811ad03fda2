//! OpenAI provider implementation
//!
//! Uses the chat completions endpoint. Streaming asks for a final usage
//! chunk through `stream_options.include_usage`.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Response;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::http::Endpoint;
use super::missing_key;
use crate::error::{ErrorKind, ProviderError};
use crate::models::{
    FinishReason, GenerateResult, Message, ProviderKind, Role, StreamChunk, TokenUsage,
};
use crate::options::GenerateOptions;
use crate::provider::Provider;
use crate::streaming::{sse_events, with_cancellation, ChunkStream};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

pub(crate) fn hint(kind: ErrorKind) -> Option<&'static str> {
    match kind {
        ErrorKind::Authentication => Some(
            "Check your OpenAI API key (OPENAI_API_KEY or `sitewright keys set openai`).",
        ),
        ErrorKind::RateLimitExceeded => {
            Some("OpenAI rate limit reached. Wait a moment before trying again.")
        }
        ErrorKind::QuotaExceeded => {
            Some("Your OpenAI quota is exhausted. Check your plan and billing details.")
        }
        ErrorKind::InvalidRequest => Some(
            "OpenAI rejected the request. The conversation may exceed the model's context window.",
        ),
        ErrorKind::ContentPolicyViolation => {
            Some("OpenAI's content filter blocked this request. Rephrase it and try again.")
        }
        _ => None,
    }
}

/// OpenAI provider implementation
pub struct OpenAiProvider {
    endpoint: Endpoint,
}

impl OpenAiProvider {
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
    ) -> OpenAiRequest {
        let mut wire = Vec::with_capacity(messages.len() + 1);
        if let Some(instruction) = &options.system_instruction {
            wire.push(OpenAiMessage {
                role: Role::System.as_str(),
                content: instruction.clone(),
            });
        }
        wire.extend(messages.iter().map(|m| OpenAiMessage {
            role: m.role.as_str(),
            content: m.content.clone(),
        }));

        OpenAiRequest {
            model: self.endpoint.model(options).to_string(),
            messages: wire,
            temperature: options.effective_temperature(),
            max_tokens: options.max_output_tokens,
            stream,
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
        }
    }

    fn request(&self, url: &str, body: &OpenAiRequest) -> Result<reqwest::RequestBuilder, ProviderError> {
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
                let parsed: OpenAiStreamChunk = serde_json::from_str(&event.data)
                    .map_err(|e| endpoint.annotate(e.into()))?;

                if let Some(error) = parsed.error {
                    Err::<(), _>(endpoint.annotate(ProviderError::from_message(error.message)))?;
                    continue;
                }
                if let Some(u) = parsed.usage {
                    usage = Some(u.to_usage());
                }
                let text: String = parsed
                    .choices
                    .iter()
                    .filter_map(|c| c.delta.as_ref()?.content.as_deref())
                    .collect();
                if !text.is_empty() {
                    yield StreamChunk::text(text);
                }
            }

            yield StreamChunk::done(usage);
        })
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
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
        let url = self.endpoint.url("chat/completions");

        debug!(provider = "openai", model = %body.model, "Sending generate request");
        let response: OpenAiResponse = self
            .endpoint
            .execute_json(options, || self.request(&url, &body))
            .await?;

        let choice = response.choices.into_iter().next().ok_or_else(|| {
            self.endpoint
                .annotate(ProviderError::parse("No choices in OpenAI response"))
        })?;
        let finish_reason = choice
            .finish_reason
            .as_deref()
            .map(map_finish_reason)
            .unwrap_or_default();
        let text = choice.message.and_then(|m| m.content).unwrap_or_default();

        Ok(GenerateResult {
            text,
            finish_reason,
            usage: response.usage.map(|u| u.to_usage()).unwrap_or_default(),
            model: response.model.unwrap_or(body.model),
            provider: Some(ProviderKind::OpenAi),
        })
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<ChunkStream, ProviderError> {
        let body = self.build_request(messages, options, true);
        let url = self.endpoint.url("chat/completions");

        debug!(provider = "openai", model = %body.model, "Sending stream request");
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

fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Other,
    }
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    #[serde(default)]
    message: Option<OpenAiContent>,
    #[serde(default)]
    delta: Option<OpenAiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiContent {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl OpenAiUsage {
    fn to_usage(&self) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            total_tokens: self.total_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
    #[serde(default)]
    error: Option<OpenAiStreamError>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamError {
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_key::{CredentialResolver, StaticCredentialSource};
    use crate::retry::RetryPolicy;
    use std::time::Duration;

    fn provider() -> OpenAiProvider {
        OpenAiProvider::new(Endpoint {
            kind: ProviderKind::OpenAi,
            http: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            credentials: CredentialResolver::new()
                .with_source(StaticCredentialSource::new("t").with_key(ProviderKind::OpenAi, "k")),
            hint,
        })
        .unwrap()
    }

    #[test]
    fn test_system_instruction_goes_first() {
        let request = provider().build_request(
            &[Message::user("hi")],
            &GenerateOptions::new().with_system_instruction("Be terse"),
            false,
        );
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][0]["content"], "Be terse");
        assert_eq!(json["messages"][1]["role"], "user");
        assert!(json.get("stream").is_none());
        assert!(json.get("max_tokens").is_none());
    }

    #[test]
    fn test_stream_requests_usage() {
        let request = provider().build_request(&[Message::user("hi")], &GenerateOptions::new(), true);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["stream"], true);
        assert_eq!(json["stream_options"]["include_usage"], true);
        assert_eq!(json["model"], DEFAULT_MODEL);
    }

    #[test]
    fn test_finish_reasons() {
        assert_eq!(map_finish_reason("stop"), FinishReason::Stop);
        assert_eq!(map_finish_reason("length"), FinishReason::Length);
        assert_eq!(map_finish_reason("content_filter"), FinishReason::ContentFilter);
        assert_eq!(map_finish_reason("tool_calls"), FinishReason::Other);
    }
}

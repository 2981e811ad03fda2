//! Google Gemini provider implementation
//!
//! Talks to the Generative Language API (`generateContent` and
//! `streamGenerateContent`). Gemini requires the conversation to open with a
//! user turn, so leading model turns are dropped before sending.

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

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

pub(crate) fn hint(kind: ErrorKind) -> Option<&'static str> {
    match kind {
        ErrorKind::Authentication => Some(
            "Check your Gemini API key from Google AI Studio (GOOGLE_API_KEY or `sitewright keys set google`).",
        ),
        ErrorKind::RateLimitExceeded => {
            Some("Gemini is rate limiting requests. Wait a minute before trying again.")
        }
        ErrorKind::QuotaExceeded => Some(
            "Your Gemini quota is used up. Check usage in Google AI Studio or switch provider.",
        ),
        ErrorKind::InvalidRequest => Some(
            "Gemini rejected the request. Check the model name and try a shorter prompt.",
        ),
        ErrorKind::ContentPolicyViolation => {
            Some("Gemini's safety filters blocked this content. Rephrase the request.")
        }
        _ => None,
    }
}

/// Google Gemini provider implementation
pub struct GoogleProvider {
    endpoint: Endpoint,
}

impl GoogleProvider {
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
    ) -> Result<GoogleRequest, ProviderError> {
        let mut system_parts: Vec<GooglePart> = Vec::new();
        if let Some(instruction) = &options.system_instruction {
            system_parts.push(GooglePart::text(instruction));
        }

        let mut contents: Vec<GoogleContent> = Vec::new();
        for message in messages {
            let role = match message.role {
                Role::System => {
                    system_parts.push(GooglePart::text(&message.content));
                    continue;
                }
                Role::User => "user",
                Role::Assistant => "model",
            };
            contents.push(GoogleContent {
                role: Some(role.to_string()),
                parts: vec![GooglePart::text(&message.content)],
            });
        }

        let first_user = contents
            .iter()
            .position(|c| c.role.as_deref() == Some("user"))
            .ok_or_else(|| {
                self.endpoint.annotate(ProviderError::new(
                    ErrorKind::InvalidRequest,
                    "Conversation must contain at least one user message",
                ))
            })?;
        if first_user > 0 {
            debug!(dropped = first_user, "Dropping leading model turns for Gemini");
            contents.drain(..first_user);
        }

        Ok(GoogleRequest {
            contents,
            system_instruction: (!system_parts.is_empty()).then(|| GoogleContent {
                role: None,
                parts: system_parts,
            }),
            generation_config: GenerationConfig {
                temperature: options.effective_temperature(),
                max_output_tokens: options.max_output_tokens,
                thinking_config: options
                    .thinking_budget_tokens
                    .map(|thinking_budget| ThinkingConfig { thinking_budget }),
            },
        })
    }

    fn decode_stream(&self, response: Response) -> ChunkStream {
        let endpoint = self.endpoint.clone();
        Box::pin(async_stream::try_stream! {
            let mut events = Box::pin(sse_events(response.bytes_stream()));
            let mut usage = None;
            let mut emitted = false;

            while let Some(event) = events.next().await {
                let event = event.map_err(|e| endpoint.annotate(e))?;
                let parsed: GoogleResponse = serde_json::from_str(&event.data)
                    .map_err(|e| endpoint.annotate(e.into()))?;

                if let Some(meta) = &parsed.usage_metadata {
                    usage = Some(meta.to_usage());
                }
                let (text, finish) = parsed.extract().map_err(|e| endpoint.annotate(e))?;
                if finish == Some(FinishReason::ContentFilter) && !emitted && text.is_empty() {
                    Err::<(), _>(endpoint.annotate(blocked("Response blocked by safety filters")))?;
                }
                if !text.is_empty() {
                    emitted = true;
                    yield StreamChunk::text(text);
                }
            }

            yield StreamChunk::done(usage);
        })
    }
}

fn blocked(message: &str) -> ProviderError {
    ProviderError::new(ErrorKind::ContentPolicyViolation, message)
}

#[async_trait]
impl Provider for GoogleProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
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
        let model = self.endpoint.model(options).to_string();
        let body = self.build_request(messages, options)?;
        let url = self.endpoint.url(&format!("models/{}:generateContent", model));

        debug!(provider = "google", model = %model, "Sending generate request");
        let response: GoogleResponse = self
            .endpoint
            .execute_json(options, || {
                let key = self.endpoint.api_key()?;
                Ok(self
                    .endpoint
                    .http
                    .post(&url)
                    .header("x-goog-api-key", key)
                    .json(&body))
            })
            .await?;

        let usage = response
            .usage_metadata
            .as_ref()
            .map(GoogleUsage::to_usage)
            .unwrap_or_default();
        let (text, finish) = response.extract().map_err(|e| self.endpoint.annotate(e))?;
        let finish_reason = finish.unwrap_or_default();
        if finish_reason == FinishReason::ContentFilter && text.is_empty() {
            return Err(self
                .endpoint
                .annotate(blocked("Response blocked by safety filters")));
        }

        Ok(GenerateResult {
            text,
            finish_reason,
            usage,
            model,
            provider: Some(ProviderKind::Google),
        })
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<ChunkStream, ProviderError> {
        let model = self.endpoint.model(options).to_string();
        let body = self.build_request(messages, options)?;
        let url = self.endpoint.url(&format!(
            "models/{}:streamGenerateContent?alt=sse",
            model
        ));

        debug!(provider = "google", model = %model, "Sending stream request");
        let response = self
            .endpoint
            .execute_stream(options, || {
                let key = self.endpoint.api_key()?;
                Ok(self
                    .endpoint
                    .http
                    .post(&url)
                    .header("x-goog-api-key", key)
                    .json(&body))
            })
            .await?;

        Ok(with_cancellation(
            self.decode_stream(response),
            options.signal.clone(),
        ))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GoogleRequest {
    contents: Vec<GoogleContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GoogleContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GoogleContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GooglePart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GooglePart {
    #[serde(default)]
    text: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    thought: bool,
}

impl GooglePart {
    fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            thought: false,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_config: Option<ThinkingConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_budget: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleResponse {
    #[serde(default)]
    candidates: Vec<GoogleCandidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    usage_metadata: Option<GoogleUsage>,
}

impl GoogleResponse {
    /// Visible text of the first candidate and its finish reason
    fn extract(&self) -> Result<(String, Option<FinishReason>), ProviderError> {
        if let Some(reason) = self
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
        {
            return Err(blocked(&format!("Prompt blocked: {}", reason)));
        }

        let Some(candidate) = self.candidates.first() else {
            return Ok((String::new(), None));
        };
        let text = candidate
            .content
            .as_ref()
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter(|part| !part.thought)
                    .map(|part| part.text.as_str())
                    .collect::<String>()
            })
            .unwrap_or_default();
        let finish = candidate.finish_reason.as_deref().map(map_finish_reason);
        Ok((text, finish))
    }
}

fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "STOP" => FinishReason::Stop,
        "MAX_TOKENS" => FinishReason::Length,
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => {
            FinishReason::ContentFilter
        }
        "OTHER" | "FINISH_REASON_UNSPECIFIED" => FinishReason::Other,
        _ => FinishReason::Other,
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleCandidate {
    #[serde(default)]
    content: Option<GoogleContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

impl GoogleUsage {
    fn to_usage(&self) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_token_count,
            completion_tokens: self.candidates_token_count,
            total_tokens: self
                .total_token_count
                .max(self.prompt_token_count + self.candidates_token_count),
        }
    }
}

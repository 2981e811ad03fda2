//! Data models for providers

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Upstream text-generation providers known to Sitewright
///
/// The set is closed: every variant has exactly one client implementation,
/// chosen by [`crate::providers::create_provider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Google Gemini (also accepted as `gemini`)
    #[serde(alias = "gemini")]
    Google,
    /// OpenAI chat completions
    #[serde(rename = "openai")]
    OpenAi,
    /// Anthropic messages
    Anthropic,
    /// Cohere chat
    Cohere,
    /// Local relay exposing `/generate` and `/stream`
    Proxy,
}

impl ProviderKind {
    /// Every provider, in default priority order
    pub const ALL: [ProviderKind; 5] = [
        ProviderKind::Google,
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Cohere,
        ProviderKind::Proxy,
    ];

    /// Canonical identifier
    pub fn id(&self) -> &'static str {
        match self {
            ProviderKind::Google => "google",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Cohere => "cohere",
            ProviderKind::Proxy => "proxy",
        }
    }

    /// Human-readable name
    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderKind::Google => "Google Gemini",
            ProviderKind::OpenAi => "OpenAI",
            ProviderKind::Anthropic => "Anthropic",
            ProviderKind::Cohere => "Cohere",
            ProviderKind::Proxy => "Local relay",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" | "gemini" => Ok(ProviderKind::Google),
            "openai" => Ok(ProviderKind::OpenAi),
            "anthropic" => Ok(ProviderKind::Anthropic),
            "cohere" => Ok(ProviderKind::Cohere),
            "proxy" => Ok(ProviderKind::Proxy),
            other => Err(ProviderError::not_configured(format!(
                "Unknown provider '{}'",
                other
            ))),
        }
    }
}

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// A chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message role (user, assistant, system)
    pub role: Role,
    /// Message content
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// Reason for generation finish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Model finished normally
    #[default]
    Stop,
    /// Maximum tokens reached
    Length,
    /// Output withheld by a safety filter
    ContentFilter,
    /// Model encountered an error
    Error,
    /// Any reason the upstream reports that has no mapping
    Other,
}

/// Token usage information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of tokens in the prompt
    pub prompt_tokens: u32,
    /// Number of tokens in the completion
    pub completion_tokens: u32,
    /// Total tokens used
    pub total_tokens: u32,
}

impl TokenUsage {
    /// Build usage from prompt and completion counts, deriving the total
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Complete result of a non-streaming generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateResult {
    /// Generated text
    pub text: String,
    /// Reason for completion
    #[serde(default)]
    pub finish_reason: FinishReason,
    /// Token usage
    #[serde(default)]
    pub usage: TokenUsage,
    /// Model that produced the text
    #[serde(default)]
    pub model: String,
    /// Provider that served the request, filled in by the client
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,
}

/// One element of a streamed generation
///
/// Chunks are ordered; text of every chunk is concatenated in order. The
/// terminal chunk has `done == true` and carries the final usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    /// Provider that served the stream, stamped by the manager
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,
}

impl StreamChunk {
    /// A partial text chunk
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            done: false,
            usage: None,
            provider: None,
        }
    }

    /// The terminal chunk
    pub fn done(usage: Option<TokenUsage>) -> Self {
        Self {
            text: String::new(),
            done: true,
            usage,
            provider: None,
        }
    }
}

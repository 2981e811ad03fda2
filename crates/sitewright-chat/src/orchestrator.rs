//! Chat orchestrator
//!
//! Turns one user submission into a provider request and records the reply
//! in the conversation.

use std::sync::Arc;

use futures::StreamExt;
use sitewright_providers::{
    GenerateOptions, ProviderError, ProviderKind, ProviderManager, RetryCallback,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::conversation::{ChatMessage, Conversation, MessageStatus};
use crate::error::{ChatError, ChatResult};
use crate::preview::{extract_html, Preview};
use crate::template::OFFLINE_TEMPLATE;

/// Default number of past messages sent with each request
pub const DEFAULT_MAX_HISTORY: usize = 40;

/// How the orchestrator talks to the providers
#[derive(Debug, Clone)]
pub struct ChatSettings {
    /// Most recent messages sent upstream
    pub max_history: usize,
    /// Stream replies instead of waiting for the full text
    pub stream: bool,
    /// Always target the healthiest provider
    pub failover: bool,
    pub provider: Option<ProviderKind>,
    pub model: Option<String>,
    pub system_instruction: Option<String>,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            max_history: DEFAULT_MAX_HISTORY,
            stream: true,
            failover: false,
            provider: None,
            model: None,
            system_instruction: None,
        }
    }
}

/// Owns one conversation and its preview
pub struct ChatOrchestrator {
    manager: Arc<ProviderManager>,
    settings: ChatSettings,
    conversation: Conversation,
    preview: Option<Preview>,
    on_retry: Option<RetryCallback>,
}

impl ChatOrchestrator {
    pub fn new(manager: Arc<ProviderManager>, settings: ChatSettings) -> Self {
        Self {
            manager,
            settings,
            conversation: Conversation::new(),
            preview: None,
            on_retry: None,
        }
    }

    /// Notify `callback` before each retry of a request
    pub fn with_retry_callback(mut self, callback: RetryCallback) -> Self {
        self.on_retry = Some(callback);
        self
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn preview(&self) -> Option<&Preview> {
        self.preview.as_ref()
    }

    pub fn manager(&self) -> &Arc<ProviderManager> {
        &self.manager
    }

    /// Forget the conversation and the preview
    pub fn clear(&mut self) {
        self.conversation.clear();
        self.preview = None;
    }

    /// Whether a provider can serve the next request
    pub fn is_ready(&self) -> bool {
        match self.settings.provider {
            Some(kind) => self.manager.is_available(kind),
            None => !self.manager.available_providers().is_empty(),
        }
    }

    /// Send `input` and return the recorded reply
    pub async fn submit(&mut self, input: &str) -> ChatResult<ChatMessage> {
        self.submit_with_signal(input, None, |_| {}).await
    }

    /// Like [`submit`](Self::submit), calling `on_update` as streamed text arrives
    pub async fn submit_with<F>(&mut self, input: &str, on_update: F) -> ChatResult<ChatMessage>
    where
        F: FnMut(&ChatMessage),
    {
        self.submit_with_signal(input, None, on_update).await
    }

    /// Like [`submit_with`](Self::submit_with), cancellable through `signal`
    pub async fn submit_with_signal<F>(
        &mut self,
        input: &str,
        signal: Option<CancellationToken>,
        on_update: F,
    ) -> ChatResult<ChatMessage>
    where
        F: FnMut(&ChatMessage),
    {
        let input = input.trim();
        if input.is_empty() {
            return Err(ChatError::EmptyInput);
        }
        self.conversation.push_user(input);

        if !self.is_ready() {
            return Ok(self.reply_offline());
        }

        let options = self.request_options(signal);
        let reply = if self.settings.stream {
            self.reply_streaming(&options, on_update).await?
        } else {
            self.reply_batch(&options).await?
        };

        self.promote_preview(&reply);
        Ok(reply)
    }

    fn request_options(&self, signal: Option<CancellationToken>) -> GenerateOptions {
        let mut options = GenerateOptions::new();
        options.provider = self.settings.provider;
        options.model = self.settings.model.clone();
        options.system_instruction = self.settings.system_instruction.clone();
        options.signal = signal;
        options.on_retry = self.on_retry.clone();
        options
    }

    fn reply_offline(&mut self) -> ChatMessage {
        info!("No provider ready, answering with the offline template");
        let message = self
            .conversation
            .push_assistant(OFFLINE_TEMPLATE, None, MessageStatus::Offline)
            .clone();
        self.preview = Some(Preview::new(OFFLINE_TEMPLATE, message.id.clone()));
        message
    }

    async fn reply_batch(&mut self, options: &GenerateOptions) -> ChatResult<ChatMessage> {
        let history = self.conversation.history(self.settings.max_history);
        debug!(messages = history.len(), "Sending chat request");

        let result = if self.settings.failover {
            self.manager.generate_with_failover(&history, options).await
        } else {
            self.manager.generate(&history, options).await
        };

        match result {
            Ok(result) => Ok(self
                .conversation
                .push_assistant(result.text, result.provider, MessageStatus::Complete)
                .clone()),
            Err(e) => {
                warn!(error = %e, "Chat request failed");
                Err(e.into())
            }
        }
    }

    async fn reply_streaming<F>(
        &mut self,
        options: &GenerateOptions,
        mut on_update: F,
    ) -> ChatResult<ChatMessage>
    where
        F: FnMut(&ChatMessage),
    {
        let history = self.conversation.history(self.settings.max_history);
        debug!(messages = history.len(), "Streaming chat request");
        self.conversation.begin_streaming();

        let opened = if self.settings.failover {
            self.manager.generate_stream_with_failover(&history, options).await
        } else {
            self.manager.generate_stream(&history, options).await
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => return Err(self.abandon_stream(e)),
        };

        let mut served_by = None;
        while let Some(item) = stream.next().await {
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(e) => return Err(self.abandon_stream(e)),
            };
            served_by = chunk.provider.or(served_by);
            if !chunk.text.is_empty() {
                if let Some(message) = self.conversation.append_to_streaming(&chunk.text) {
                    on_update(message);
                }
            }
            if chunk.done {
                break;
            }
        }

        self.conversation
            .finish_streaming(served_by)
            .cloned()
            .ok_or_else(|| ProviderError::parse("Streaming reply went missing").into())
    }

    /// Drop an empty placeholder, or keep partial text as interrupted
    fn abandon_stream(&mut self, error: ProviderError) -> ChatError {
        let shown = self
            .conversation
            .streaming()
            .map(|m| !m.content.is_empty())
            .unwrap_or(false);

        if shown {
            warn!(error = %error, "Stream failed after partial output");
            self.conversation.interrupt_streaming();
        } else {
            warn!(error = %error, "Stream failed before any output");
            self.conversation.discard_streaming();
        }
        error.into()
    }

    fn promote_preview(&mut self, message: &ChatMessage) {
        if let Some(html) = extract_html(&message.content) {
            debug!(message_id = %message.id, bytes = html.len(), "Promoting reply to preview");
            self.preview = Some(Preview::new(html, message.id.clone()));
        }
    }
}

//! Chat command - One-shot or interactive site generation

use std::path::PathBuf;
use std::sync::Arc;

use sitewright_chat::{ChatOrchestrator, ChatSettings};
use sitewright_providers::{ProviderManager, RetryCallback};

use crate::chat::ChatSession;
use crate::commands::{parse_provider, Command};
use crate::error::CliResult;
use crate::output;

/// Chat command handler
pub struct ChatCommand {
    pub message: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub stream: bool,
    pub failover: bool,
    pub output: Option<PathBuf>,
    manager: Arc<ProviderManager>,
}

impl ChatCommand {
    pub fn new(manager: Arc<ProviderManager>, message: Option<String>) -> Self {
        Self {
            message,
            provider: None,
            model: None,
            stream: true,
            failover: false,
            output: None,
            manager,
        }
    }

    pub fn with_provider(mut self, provider: Option<String>) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_failover(mut self, failover: bool) -> Self {
        self.failover = failover;
        self
    }

    pub fn with_output(mut self, output: Option<PathBuf>) -> Self {
        self.output = output;
        self
    }

    /// Orchestrator settings for this invocation
    pub fn chat_settings(&self) -> CliResult<ChatSettings> {
        let provider = self.provider.as_deref().map(parse_provider).transpose()?;
        Ok(ChatSettings {
            stream: self.stream,
            failover: self.failover,
            provider,
            model: self.model.clone(),
            ..ChatSettings::default()
        })
    }

    fn session(&self) -> CliResult<ChatSession> {
        let orchestrator = ChatOrchestrator::new(self.manager.clone(), self.chat_settings()?)
            .with_retry_callback(RetryCallback::new(|event| {
                output::print_warning(&format!(
                    "{} (attempt {}), retrying in {:.1}s",
                    event.error,
                    event.attempt,
                    event.delay.as_secs_f64()
                ));
            }));
        Ok(ChatSession::new(orchestrator, self.output.clone()))
    }
}

#[async_trait::async_trait]
impl Command for ChatCommand {
    async fn execute(&self) -> CliResult<()> {
        let mut session = self.session()?;
        match &self.message {
            Some(message) => session.send(message).await,
            None => session.start().await,
        }
    }
}

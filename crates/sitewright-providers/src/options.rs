//! Per-request generation options

use tokio_util::sync::CancellationToken;

use crate::models::ProviderKind;
use crate::retry::{RetryCallback, RetryHooks, RetryPolicy};

/// Temperature used when a request does not set one
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Options accepted by every generation call
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// Explicit provider choice; `None` lets the manager decide
    pub provider: Option<ProviderKind>,
    /// Model override; `None` uses the provider's configured model
    pub model: Option<String>,
    /// System prompt sent alongside the conversation
    pub system_instruction: Option<String>,
    /// Sampling temperature (defaults to [`DEFAULT_TEMPERATURE`])
    pub temperature: Option<f32>,
    /// Upper bound on generated tokens
    pub max_output_tokens: Option<u32>,
    /// Reasoning budget for providers that support one
    pub thinking_budget_tokens: Option<u32>,
    /// Cancels the in-flight request and any pending retry
    pub signal: Option<CancellationToken>,
    /// Notified before each retry sleep
    pub on_retry: Option<RetryCallback>,
    /// Overrides the configured attempt budget
    pub max_attempts: Option<u32>,
    /// Whether the manager may switch to a fallback provider
    pub allow_fallback: bool,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            system_instruction: None,
            temperature: None,
            max_output_tokens: None,
            thinking_budget_tokens: None,
            signal: None,
            on_retry: None,
            max_attempts: None,
            allow_fallback: true,
        }
    }
}

impl GenerateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = Some(tokens);
        self
    }

    pub fn with_thinking_budget(mut self, tokens: u32) -> Self {
        self.thinking_budget_tokens = Some(tokens);
        self
    }

    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn with_on_retry(mut self, callback: RetryCallback) -> Self {
        self.on_retry = Some(callback);
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn without_fallback(mut self) -> Self {
        self.allow_fallback = false;
        self
    }

    pub fn effective_temperature(&self) -> f32 {
        self.temperature.unwrap_or(DEFAULT_TEMPERATURE)
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal
            .as_ref()
            .map(CancellationToken::is_cancelled)
            .unwrap_or(false)
    }

    /// Hooks for the retry executor
    pub fn retry_hooks(&self) -> RetryHooks {
        RetryHooks {
            signal: self.signal.clone(),
            on_retry: self.on_retry.clone(),
        }
    }

    /// `base` with this request's attempt override applied
    pub fn retry_policy(&self, base: &RetryPolicy) -> RetryPolicy {
        match self.max_attempts {
            Some(attempts) => base.clone().with_max_attempts(attempts),
            None => base.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = GenerateOptions::default();
        assert_eq!(options.effective_temperature(), DEFAULT_TEMPERATURE);
        assert!(options.allow_fallback);
        assert!(!options.is_cancelled());
    }

    #[test]
    fn test_attempt_override() {
        let base = RetryPolicy::default();
        let options = GenerateOptions::new().with_max_attempts(1);
        assert_eq!(options.retry_policy(&base).max_attempts, 1);
        assert_eq!(GenerateOptions::new().retry_policy(&base).max_attempts, 3);
    }

    #[test]
    fn test_signal_is_shared_with_hooks() {
        let token = CancellationToken::new();
        let options = GenerateOptions::new().with_signal(token.clone());
        let hooks = options.retry_hooks();
        token.cancel();
        assert!(options.is_cancelled());
        assert!(hooks.is_cancelled());
    }
}

//! Chat error types

use sitewright_providers::ProviderError;
use thiserror::Error;

/// Result type for chat operations
pub type ChatResult<T> = Result<T, ChatError>;

#[derive(Error, Debug, Clone)]
pub enum ChatError {
    #[error("Message is empty")]
    EmptyInput,

    /// The request failed after retries and fallback
    #[error("{0}")]
    Provider(#[from] ProviderError),
}

impl ChatError {
    /// Whether the user cancelled the request
    pub fn is_aborted(&self) -> bool {
        matches!(self, ChatError::Provider(e) if e.is_aborted())
    }

    /// Get a user-friendly error message with a suggested remedy
    pub fn user_message(&self) -> String {
        match self {
            ChatError::EmptyInput => {
                "Nothing to send.\n\nType a description of the site you want to build.".to_string()
            }
            ChatError::Provider(e) if e.is_aborted() => "Request cancelled.".to_string(),
            ChatError::Provider(e) => e.user_message(),
        }
    }
}

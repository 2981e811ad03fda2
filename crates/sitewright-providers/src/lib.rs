//! Sitewright AI Providers - request routing across text-generation providers
//!
//! This crate wraps Google Gemini, OpenAI, Anthropic, Cohere and a local relay
//! behind one [`Provider`] interface, and adds the resilience around them:
//! bounded retry with backoff, per-provider health tracking, and a
//! [`ProviderManager`] that picks a provider per request and falls back once
//! on failure.

pub mod api_key;
pub mod config;
pub mod error;
pub mod fallback;
pub mod health_check;
pub mod models;
pub mod options;
pub mod provider;
pub mod providers;
pub mod retry;
pub mod streaming;

// Re-export commonly used types
pub use api_key::{
    CredentialResolver, CredentialSource, EnvCredentialSource, SettingsCredentialSource,
    StaticCredentialSource,
};
pub use config::{ConfigError, ConfigurationManager, ProviderSettings, ProvidersConfig};
pub use error::{ErrorKind, ProviderError};
pub use fallback::FallbackDecision;
pub use health_check::{
    HealthPolicy, HealthState, HealthTracker, ProviderHealthMetrics, ProviderHealthStatus,
};
pub use models::{
    FinishReason, GenerateResult, Message, ProviderKind, Role, StreamChunk, TokenUsage,
};
pub use options::{GenerateOptions, DEFAULT_TEMPERATURE};
pub use provider::{
    ManagerSettings, Provider, ProviderFactory, ProviderManager, ProviderRegistry, RegistryEntry,
};
pub use providers::{create_provider, HttpProviderFactory, ProviderContext};
pub use retry::{
    execute_with_retry, is_retryable, RetryCallback, RetryEvent, RetryHooks, RetryPolicy,
    RetrySettings,
};
pub use streaming::{collect_stream, ChunkStream};

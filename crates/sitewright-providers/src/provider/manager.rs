//! Provider manager for orchestrating provider operations
//!
//! Resolves which provider serves a request, delegates to its client, feeds
//! every outcome into that provider's health tracker, and on failure moves
//! the request once to a fallback provider.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use futures::StreamExt;
use tracing::{debug, info, warn};

use super::{ProviderFactory, ProviderRegistry, RegistryEntry};
use crate::api_key::CredentialResolver;
use crate::config::ProvidersConfig;
use crate::error::ProviderError;
use crate::fallback::{classify_failure, healthiest, select_fallback, FallbackDecision};
use crate::health_check::{HealthPolicy, ProviderHealthMetrics, ProviderHealthStatus};
use crate::models::{GenerateResult, Message, ProviderKind, StreamChunk};
use crate::options::GenerateOptions;
use crate::provider::Provider;
use crate::providers::{HttpProviderFactory, ProviderContext};
use crate::streaming::ChunkStream;

/// Selection and fallback policy
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerSettings {
    /// Preferred provider when a request does not name one
    pub default_provider: Option<ProviderKind>,
    /// Every provider, most preferred first
    pub priority: Vec<ProviderKind>,
    pub fallback_enabled: bool,
    pub health: HealthPolicy,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            default_provider: None,
            priority: ProviderKind::ALL.to_vec(),
            fallback_enabled: true,
            health: HealthPolicy::default(),
        }
    }
}

impl ManagerSettings {
    pub fn from_config(config: &ProvidersConfig) -> Self {
        Self {
            default_provider: config.default_provider,
            priority: config.priority_order(),
            fallback_enabled: config.fallback.enabled,
            health: config.health.clone(),
        }
    }
}

/// Central coordinator for provider operations
#[derive(Debug)]
pub struct ProviderManager {
    registry: ProviderRegistry,
    settings: ManagerSettings,
}

impl ProviderManager {
    pub fn new(factory: Arc<dyn ProviderFactory>, settings: ManagerSettings) -> Self {
        Self {
            registry: ProviderRegistry::new(factory, settings.health.clone()),
            settings,
        }
    }

    /// Manager backed by the real HTTP clients
    pub fn from_config(config: ProvidersConfig, credentials: CredentialResolver) -> Self {
        let settings = ManagerSettings::from_config(&config);
        let factory = HttpProviderFactory::new(ProviderContext::new(config, credentials));
        Self::new(Arc::new(factory), settings)
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    /// Client for `kind`, built on first access
    pub fn get_provider(&self, kind: ProviderKind) -> Result<Arc<dyn Provider>, ProviderError> {
        self.registry.get_or_create(kind).map(|entry| entry.client)
    }

    /// Whether `kind` can be constructed and has what it needs
    pub fn is_available(&self, kind: ProviderKind) -> bool {
        match self.registry.get_or_create(kind) {
            Ok(entry) => entry.client.is_available(),
            Err(e) => {
                debug!(provider = %kind, error = %e, "Provider unavailable");
                false
            }
        }
    }

    /// Available providers, in priority order
    pub fn available_providers(&self) -> Vec<ProviderKind> {
        self.settings
            .priority
            .iter()
            .copied()
            .filter(|kind| self.is_available(*kind))
            .collect()
    }

    /// Available provider in the best current health, if any
    pub fn healthiest_provider(&self) -> Option<ProviderKind> {
        let candidates: Vec<(ProviderKind, ProviderHealthStatus)> = self
            .available_providers()
            .into_iter()
            .filter_map(|kind| Some((kind, self.registry.get(kind)?.health.status())))
            .collect();
        healthiest(&candidates, &self.settings.priority)
    }

    /// Provider that serves a request
    ///
    /// An explicit choice wins; otherwise the configured default if it is
    /// available, otherwise the first available provider by priority.
    pub fn resolve_provider(&self, options: &GenerateOptions) -> Result<ProviderKind, ProviderError> {
        if let Some(kind) = options.provider {
            return Ok(kind);
        }
        if let Some(kind) = self.settings.default_provider {
            if self.is_available(kind) {
                return Ok(kind);
            }
            debug!(provider = %kind, "Default provider unavailable");
        }
        self.available_providers().into_iter().next().ok_or_else(|| {
            ProviderError::not_configured("No AI provider is configured")
        })
    }

    fn fallback_target(
        &self,
        primary: ProviderKind,
        error: &ProviderError,
        options: &GenerateOptions,
    ) -> Option<ProviderKind> {
        if !self.settings.fallback_enabled || !options.allow_fallback || options.is_cancelled() {
            return None;
        }
        if classify_failure(error) == FallbackDecision::Surface {
            return None;
        }
        select_fallback(primary, &self.available_providers())
    }

    /// Options for the fallback attempt, which runs on its own default model
    fn fallback_options(fallback: ProviderKind, options: &GenerateOptions) -> GenerateOptions {
        let mut options = options.clone();
        options.provider = Some(fallback);
        options.model = None;
        options
    }

    fn record_failure(entry: &RegistryEntry, error: &ProviderError) {
        if !error.is_aborted() {
            entry.health.record_failure(error);
        }
    }

    async fn generate_on(
        &self,
        kind: ProviderKind,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<GenerateResult, ProviderError> {
        let entry = self.registry.get_or_create(kind)?;
        let started = Instant::now();

        match entry.client.generate(messages, options).await {
            Ok(mut result) => {
                entry.health.record_success(started.elapsed());
                if result.provider.is_none() {
                    result.provider = Some(kind);
                }
                Ok(result)
            }
            Err(e) => {
                Self::record_failure(&entry, &e);
                Err(e)
            }
        }
    }

    /// Generate a complete response, with one fallback on failure
    pub async fn generate(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<GenerateResult, ProviderError> {
        let primary = self.resolve_provider(options)?;
        debug!(provider = %primary, "Generating");

        let error = match self.generate_on(primary, messages, options).await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        let Some(fallback) = self.fallback_target(primary, &error, options) else {
            return Err(error);
        };
        warn!(
            primary = %primary,
            fallback = %fallback,
            error = %error,
            "Primary provider failed, falling back"
        );
        self.generate_on(fallback, messages, &Self::fallback_options(fallback, options))
            .await
    }

    /// Open a stream and wait for its first element
    ///
    /// A failure before the first chunk is returned as an error so the
    /// caller may still fall back; later failures stay in the stream.
    async fn stream_on(
        &self,
        kind: ProviderKind,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<ChunkStream, ProviderError> {
        let entry = self.registry.get_or_create(kind)?;
        let started = Instant::now();

        let mut stream = match entry.client.generate_stream(messages, options).await {
            Ok(stream) => stream,
            Err(e) => {
                Self::record_failure(&entry, &e);
                return Err(e);
            }
        };

        let first = match stream.next().await {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                Self::record_failure(&entry, &e);
                return Err(e);
            }
            None => StreamChunk::done(None),
        };

        let health = entry.health.clone();
        Ok(Box::pin(async_stream::stream! {
            let mut pending = Some(Ok(first));
            loop {
                let item = match pending.take() {
                    Some(item) => Some(item),
                    None => stream.next().await,
                };

                match item {
                    None => {
                        health.record_success(started.elapsed());
                        break;
                    }
                    Some(Ok(mut chunk)) => {
                        chunk.provider.get_or_insert(kind);
                        let done = chunk.done;
                        yield Ok(chunk);
                        if done {
                            health.record_success(started.elapsed());
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        if !e.is_aborted() {
                            health.record_failure(&e);
                        }
                        yield Err(e);
                        break;
                    }
                }
            }
        }))
    }

    /// Stream a response, with one fallback if nothing was emitted yet
    pub async fn generate_stream(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<ChunkStream, ProviderError> {
        let primary = self.resolve_provider(options)?;
        debug!(provider = %primary, "Streaming");

        let error = match self.stream_on(primary, messages, options).await {
            Ok(stream) => return Ok(stream),
            Err(e) => e,
        };

        let Some(fallback) = self.fallback_target(primary, &error, options) else {
            return Err(error);
        };
        warn!(
            primary = %primary,
            fallback = %fallback,
            error = %error,
            "Primary provider failed before streaming, falling back"
        );
        self.stream_on(fallback, messages, &Self::fallback_options(fallback, options))
            .await
    }

    fn failover_options(&self, options: &GenerateOptions) -> Result<GenerateOptions, ProviderError> {
        let target = self
            .healthiest_provider()
            .ok_or_else(|| ProviderError::not_configured("No AI provider is configured"))?;
        info!(provider = %target, "Failover selected healthiest provider");

        let mut options = options.clone();
        options.provider = Some(target);
        Ok(options)
    }

    /// Like [`generate`](Self::generate), targeting the healthiest provider
    pub async fn generate_with_failover(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<GenerateResult, ProviderError> {
        let options = self.failover_options(options)?;
        self.generate(messages, &options).await
    }

    /// Like [`generate_stream`](Self::generate_stream), targeting the healthiest provider
    pub async fn generate_stream_with_failover(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<ChunkStream, ProviderError> {
        let options = self.failover_options(options)?;
        self.generate_stream(messages, &options).await
    }

    /// Probe one provider
    pub async fn check_health(&self, kind: ProviderKind) -> Result<ProviderHealthStatus, ProviderError> {
        let entry = self.registry.get_or_create(kind)?;
        Ok(entry.health.check_health().await)
    }

    /// Probe every available provider concurrently
    pub async fn check_all_health(&self) -> Vec<(ProviderKind, ProviderHealthStatus)> {
        let entries: Vec<RegistryEntry> = self
            .available_providers()
            .into_iter()
            .filter_map(|kind| self.registry.get(kind))
            .collect();

        let statuses = join_all(entries.iter().map(|entry| entry.health.check_health())).await;
        entries.iter().map(|e| e.kind).zip(statuses).collect()
    }

    /// Current status, if the provider has been used
    pub fn health_status(&self, kind: ProviderKind) -> Option<ProviderHealthStatus> {
        self.registry.get(kind).map(|entry| entry.health.status())
    }

    pub fn health_metrics(&self, kind: ProviderKind) -> Option<ProviderHealthMetrics> {
        self.registry.get(kind).map(|entry| entry.health.metrics())
    }

    /// Reset one provider's health; returns whether it was registered
    pub fn reset_health(&self, kind: ProviderKind) -> bool {
        match self.registry.get(kind) {
            Some(entry) => {
                entry.health.reset();
                true
            }
            None => false,
        }
    }
}

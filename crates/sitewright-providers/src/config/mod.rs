//! Configuration management for providers
//!
//! Configuration is layered: built-in defaults, then the global file, then
//! the project file, then environment variables. Each file layer only needs
//! to name the values it changes.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use sitewright_storage::PathResolver;
use thiserror::Error;
use tracing::debug;

use crate::api_key::StaticCredentialSource;
use crate::error::ProviderError;
use crate::health_check::HealthPolicy;
use crate::models::ProviderKind;
use crate::retry::{RetryPolicy, RetrySettings};

/// Overrides the default provider
pub const DEFAULT_PROVIDER_ENV: &str = "SITEWRIGHT_DEFAULT_PROVIDER";
/// Comma-separated provider priority list
pub const PROVIDER_PRIORITY_ENV: &str = "SITEWRIGHT_PROVIDER_PRIORITY";
/// Base URL of the local relay
pub const PROXY_URL_ENV: &str = "SITEWRIGHT_PROXY_URL";

/// Request timeout used when a provider does not set one
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value in {var}: {message}")]
    Env { var: String, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for ProviderError {
    fn from(err: ConfigError) -> Self {
        ProviderError::not_configured(err.to_string())
    }
}

/// Settings for a single provider
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// API key written directly in the config file
    pub api_key: Option<String>,
    /// Endpoint override
    pub base_url: Option<String>,
    /// Model used when a request does not name one
    pub model: Option<String>,
    /// Per-request timeout in seconds
    pub timeout_secs: Option<u64>,
}

impl ProviderSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackSettings {
    pub enabled: bool,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    /// Base URL exposing `/generate` and `/stream`
    pub url: Option<String>,
}

/// Complete provider configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Preferred provider when a request does not choose one
    pub default_provider: Option<ProviderKind>,
    /// Selection and fallback order; unlisted providers follow in default order
    pub priority: Vec<ProviderKind>,
    /// Per-provider settings
    pub providers: BTreeMap<ProviderKind, ProviderSettings>,
    pub retry: RetrySettings,
    pub health: HealthPolicy,
    pub fallback: FallbackSettings,
    pub proxy: ProxySettings,
}

impl ProvidersConfig {
    /// Parse a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            message: e.to_string(),
        })
    }

    /// Settings for `kind`, or defaults when none are configured
    pub fn provider(&self, kind: ProviderKind) -> ProviderSettings {
        self.providers.get(&kind).cloned().unwrap_or_default()
    }

    /// Full priority order: configured entries first, then the rest
    pub fn priority_order(&self) -> Vec<ProviderKind> {
        let mut order: Vec<ProviderKind> = Vec::with_capacity(ProviderKind::ALL.len());
        for kind in self.priority.iter().chain(ProviderKind::ALL.iter()) {
            if !order.contains(kind) {
                order.push(*kind);
            }
        }
        order
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.retry)
    }

    /// Relay base URL from `providers.proxy.base_url` or `proxy.url`
    pub fn proxy_url(&self) -> Option<String> {
        self.providers
            .get(&ProviderKind::Proxy)
            .and_then(|s| s.base_url.clone())
            .or_else(|| self.proxy.url.clone())
            .filter(|url| !url.trim().is_empty())
    }

    /// Keys written in the config file, as a credential source
    pub fn credential_source(&self) -> StaticCredentialSource {
        let mut source = StaticCredentialSource::new("configuration");
        for (kind, settings) in &self.providers {
            if let Some(key) = &settings.api_key {
                source.insert(*kind, key.clone());
            }
        }
        source
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(ConfigError::Invalid(format!(
                "retry.jitter must be between 0 and 1, got {}",
                self.retry.jitter
            )));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".to_string(),
            ));
        }
        if self.health.unhealthy_threshold == 0 {
            return Err(ConfigError::Invalid(
                "health.unhealthy_threshold must be at least 1".to_string(),
            ));
        }
        if self.health.history_limit == 0 {
            return Err(ConfigError::Invalid(
                "health.history_limit must be at least 1".to_string(),
            ));
        }
        for (kind, settings) in &self.providers {
            if settings.timeout_secs == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "providers.{}.timeout_secs must be at least 1",
                    kind
                )));
            }
        }
        Ok(())
    }
}

/// Loads and layers [`ProvidersConfig`]
#[derive(Debug, Clone)]
pub struct ConfigurationManager {
    merged: Value,
}

impl Default for ConfigurationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigurationManager {
    /// Start from built-in defaults
    pub fn new() -> Self {
        let merged = serde_yaml::to_value(ProvidersConfig::default())
            .unwrap_or(Value::Mapping(Default::default()));
        Self { merged }
    }

    /// Load configuration with precedence:
    /// 1. Environment variables (highest priority)
    /// 2. Project config (`./.sitewright/config.yaml`)
    /// 3. Global config (`$SITEWRIGHT_HOME/config.yaml`)
    /// 4. Built-in defaults (lowest priority)
    pub fn load_with_precedence(&mut self) -> Result<ProvidersConfig, ConfigError> {
        match PathResolver::global_config_file() {
            Ok(path) => self.merge_from_file(&path)?,
            Err(e) => debug!(error = %e, "Skipping global config"),
        }
        self.merge_from_file(&PathResolver::project_config_file())?;
        self.load_from_env()?;
        self.config()
    }

    /// Merge a YAML file over the current values; a missing file is skipped
    pub fn merge_from_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        if !path.exists() {
            return Ok(());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        self.merge_yaml(&content).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })?;
        debug!(path = %path.display(), "Merged config file");
        Ok(())
    }

    /// Merge a YAML document over the current values
    pub fn merge_str(&mut self, yaml: &str) -> Result<(), ConfigError> {
        self.merge_yaml(yaml).map_err(|message| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            message,
        })
    }

    fn merge_yaml(&mut self, yaml: &str) -> Result<(), String> {
        if yaml.trim().is_empty() {
            return Ok(());
        }
        let overlay: Value = serde_yaml::from_str(yaml).map_err(|e| e.to_string())?;
        match overlay {
            Value::Null => Ok(()),
            Value::Mapping(_) => {
                merge_values(&mut self.merged, overlay);
                Ok(())
            }
            _ => Err("top level must be a mapping".to_string()),
        }
    }

    /// Apply environment overrides from the process environment
    pub fn load_from_env(&mut self) -> Result<(), ConfigError> {
        self.load_from_env_with(|var| std::env::var(var).ok())
    }

    /// Apply environment overrides using `lookup` to read variables
    pub fn load_from_env_with(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let mut overlay = serde_yaml::Mapping::new();

        if let Some(value) = lookup(DEFAULT_PROVIDER_ENV).filter(|v| !v.trim().is_empty()) {
            let kind = parse_kind(DEFAULT_PROVIDER_ENV, &value)?;
            overlay.insert("default_provider".into(), kind.id().into());
        }

        if let Some(value) = lookup(PROVIDER_PRIORITY_ENV).filter(|v| !v.trim().is_empty()) {
            let kinds = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| parse_kind(PROVIDER_PRIORITY_ENV, s).map(|k| Value::from(k.id())))
                .collect::<Result<Vec<_>, _>>()?;
            overlay.insert("priority".into(), Value::Sequence(kinds));
        }

        if let Some(value) = lookup(PROXY_URL_ENV).filter(|v| !v.trim().is_empty()) {
            let mut proxy = serde_yaml::Mapping::new();
            proxy.insert("url".into(), value.trim().into());
            overlay.insert("proxy".into(), Value::Mapping(proxy));
        }

        merge_values(&mut self.merged, Value::Mapping(overlay));
        Ok(())
    }

    /// The merged, validated configuration
    pub fn config(&self) -> Result<ProvidersConfig, ConfigError> {
        let config: ProvidersConfig = serde_yaml::from_value(self.merged.clone())
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

fn parse_kind(var: &str, value: &str) -> Result<ProviderKind, ConfigError> {
    value.parse::<ProviderKind>().map_err(|_| ConfigError::Env {
        var: var.to_string(),
        message: format!("unknown provider '{}'", value.trim()),
    })
}

/// Recursively merge `overlay` into `base`; mappings merge, everything else replaces
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_key::CredentialSource;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = ConfigurationManager::new().config().unwrap();
        assert_eq!(config, ProvidersConfig::default());
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.retry.max_delay_ms, 30_000);
        assert_eq!(config.health.unhealthy_threshold, 3);
        assert!(config.fallback.enabled);
    }

    #[test]
    fn test_layers_merge_field_by_field() {
        let mut manager = ConfigurationManager::new();
        manager
            .merge_str(
                r#"
default_provider: anthropic
providers:
  openai:
    model: gpt-4o-mini
    api_key: sk-global
retry:
  max_attempts: 5
"#,
            )
            .unwrap();
        manager
            .merge_str(
                r#"
providers:
  openai:
    base_url: http://localhost:9999
"#,
            )
            .unwrap();

        let config = manager.config().unwrap();
        assert_eq!(config.default_provider, Some(ProviderKind::Anthropic));
        let openai = config.provider(ProviderKind::OpenAi);
        assert_eq!(openai.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(openai.api_key.as_deref(), Some("sk-global"));
        assert_eq!(openai.base_url.as_deref(), Some("http://localhost:9999"));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 1000);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (DEFAULT_PROVIDER_ENV, "gemini"),
            (PROVIDER_PRIORITY_ENV, "cohere, openai"),
            (PROXY_URL_ENV, "http://127.0.0.1:8787"),
        ]
        .into_iter()
        .collect();

        let mut manager = ConfigurationManager::new();
        manager.merge_str("default_provider: openai").unwrap();
        manager
            .load_from_env_with(|var| env.get(var).map(|v| v.to_string()))
            .unwrap();

        let config = manager.config().unwrap();
        assert_eq!(config.default_provider, Some(ProviderKind::Google));
        assert_eq!(
            config.priority,
            vec![ProviderKind::Cohere, ProviderKind::OpenAi]
        );
        assert_eq!(config.proxy_url().as_deref(), Some("http://127.0.0.1:8787"));
    }

    #[test]
    fn test_env_rejects_unknown_provider() {
        let mut manager = ConfigurationManager::new();
        let err = manager
            .load_from_env_with(|var| (var == DEFAULT_PROVIDER_ENV).then(|| "mistral".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { .. }));
    }

    #[test]
    fn test_unknown_provider_in_file_is_rejected() {
        let mut manager = ConfigurationManager::new();
        manager.merge_str("default_provider: mistral").unwrap();
        assert!(manager.config().is_err());
    }

    #[test]
    fn test_validation() {
        let mut config = ProvidersConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = ProvidersConfig::default();
        config.retry.jitter = 1.5;
        assert!(config.validate().is_err());

        let mut config = ProvidersConfig::default();
        config.health.unhealthy_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_priority_order_appends_missing() {
        let config = ProvidersConfig {
            priority: vec![ProviderKind::Cohere, ProviderKind::Cohere],
            ..Default::default()
        };
        assert_eq!(
            config.priority_order(),
            vec![
                ProviderKind::Cohere,
                ProviderKind::Google,
                ProviderKind::OpenAi,
                ProviderKind::Anthropic,
                ProviderKind::Proxy,
            ]
        );
    }

    #[test]
    fn test_missing_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = ConfigurationManager::new();
        manager
            .merge_from_file(&dir.path().join("absent.yaml"))
            .unwrap();
        assert!(manager.config().is_ok());
    }

    #[test]
    fn test_credential_source_and_redaction() {
        let config = ProvidersConfig::from_yaml(
            "providers:\n  cohere:\n    api_key: co-secret\n",
        )
        .unwrap();
        assert_eq!(
            config.credential_source().lookup(ProviderKind::Cohere).as_deref(),
            Some("co-secret")
        );
        assert!(!format!("{:?}", config).contains("co-secret"));
    }
}

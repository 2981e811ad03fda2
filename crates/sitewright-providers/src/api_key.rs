//! Credential lookup
//!
//! Credentials are resolved through an ordered list of sources. Each source
//! may or may not know a key for a provider; the first non-blank value wins.
//! The standard chain is environment, then configuration file, then the
//! local settings store.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use sitewright_storage::{api_key_setting, LocalSettingsStore};

use crate::models::ProviderKind;

/// Environment variables consulted for each provider, in order
pub fn env_vars(kind: ProviderKind) -> &'static [&'static str] {
    match kind {
        ProviderKind::Google => &["GOOGLE_API_KEY", "GEMINI_API_KEY"],
        ProviderKind::OpenAi => &["OPENAI_API_KEY"],
        ProviderKind::Anthropic => &["ANTHROPIC_API_KEY"],
        ProviderKind::Cohere => &["COHERE_API_KEY", "CO_API_KEY"],
        ProviderKind::Proxy => &["SITEWRIGHT_PROXY_TOKEN"],
    }
}

/// One place a credential may come from
pub trait CredentialSource: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// The credential for `kind`, if this source has one
    fn lookup(&self, kind: ProviderKind) -> Option<String>;
}

/// Process environment
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentialSource;

impl CredentialSource for EnvCredentialSource {
    fn name(&self) -> &str {
        "environment"
    }

    fn lookup(&self, kind: ProviderKind) -> Option<String> {
        env_vars(kind)
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|value| !value.trim().is_empty())
    }
}

/// Keys from a fixed map, used for keys written in configuration files
#[derive(Default, Clone)]
pub struct StaticCredentialSource {
    name: String,
    keys: HashMap<ProviderKind, String>,
}

impl StaticCredentialSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keys: HashMap::new(),
        }
    }

    pub fn with_key(mut self, kind: ProviderKind, key: impl Into<String>) -> Self {
        self.keys.insert(kind, key.into());
        self
    }

    pub fn insert(&mut self, kind: ProviderKind, key: impl Into<String>) {
        self.keys.insert(kind, key.into());
    }
}

impl fmt::Debug for StaticCredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentialSource")
            .field("name", &self.name)
            .field("providers", &self.keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CredentialSource for StaticCredentialSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookup(&self, kind: ProviderKind) -> Option<String> {
        self.keys.get(&kind).cloned()
    }
}

/// Keys saved with `sitewright keys set`, stored as `api_key.<provider>`
#[derive(Debug, Clone)]
pub struct SettingsCredentialSource {
    store: Arc<LocalSettingsStore>,
}

impl SettingsCredentialSource {
    pub fn new(store: Arc<LocalSettingsStore>) -> Self {
        Self { store }
    }
}

impl CredentialSource for SettingsCredentialSource {
    fn name(&self) -> &str {
        "local settings"
    }

    fn lookup(&self, kind: ProviderKind) -> Option<String> {
        self.store.get(&api_key_setting(kind.id()))
    }
}

/// Ordered chain of credential sources
#[derive(Clone, Default)]
pub struct CredentialResolver {
    sources: Vec<Arc<dyn CredentialSource>>,
}

impl CredentialResolver {
    /// An empty chain; every provider resolves to `None`
    pub fn new() -> Self {
        Self::default()
    }

    /// Environment, then `config_keys`, then `settings`
    pub fn standard(config_keys: StaticCredentialSource, settings: Arc<LocalSettingsStore>) -> Self {
        Self::new()
            .with_source(EnvCredentialSource)
            .with_source(config_keys)
            .with_source(SettingsCredentialSource::new(settings))
    }

    pub fn with_source(mut self, source: impl CredentialSource + 'static) -> Self {
        self.sources.push(Arc::new(source));
        self
    }

    /// First non-blank credential for `kind`
    pub fn resolve(&self, kind: ProviderKind) -> Option<String> {
        self.sources.iter().find_map(|source| {
            let value = source.lookup(kind)?;
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                tracing::trace!(provider = %kind, source = source.name(), "Credential resolved");
                Some(trimmed.to_string())
            }
        })
    }

    pub fn has_credential(&self, kind: ProviderKind) -> bool {
        self.resolve(kind).is_some()
    }

    /// Name of the source that would supply the credential
    pub fn source_of(&self, kind: ProviderKind) -> Option<&str> {
        self.sources
            .iter()
            .find(|source| {
                source
                    .lookup(kind)
                    .map(|value| !value.trim().is_empty())
                    .unwrap_or(false)
            })
            .map(|source| source.name())
    }
}

impl fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.sources.iter().map(|source| source.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_source_wins() {
        let resolver = CredentialResolver::new()
            .with_source(StaticCredentialSource::new("first").with_key(ProviderKind::OpenAi, "a"))
            .with_source(StaticCredentialSource::new("second").with_key(ProviderKind::OpenAi, "b"));
        assert_eq!(resolver.resolve(ProviderKind::OpenAi).as_deref(), Some("a"));
        assert_eq!(resolver.source_of(ProviderKind::OpenAi), Some("first"));
    }

    #[test]
    fn test_blank_values_are_skipped() {
        let resolver = CredentialResolver::new()
            .with_source(StaticCredentialSource::new("blank").with_key(ProviderKind::Cohere, "  "))
            .with_source(StaticCredentialSource::new("real").with_key(ProviderKind::Cohere, " key "));
        assert_eq!(resolver.resolve(ProviderKind::Cohere).as_deref(), Some("key"));
        assert_eq!(resolver.source_of(ProviderKind::Cohere), Some("real"));
    }

    #[test]
    fn test_settings_source() {
        let store = Arc::new(LocalSettingsStore::in_memory());
        store.set("api_key.anthropic", "sk-ant").unwrap();
        let resolver = CredentialResolver::new().with_source(SettingsCredentialSource::new(store));
        assert!(resolver.has_credential(ProviderKind::Anthropic));
        assert!(!resolver.has_credential(ProviderKind::Google));
    }

    #[test]
    fn test_debug_hides_keys() {
        let source = StaticCredentialSource::new("config").with_key(ProviderKind::OpenAi, "secret");
        assert!(!format!("{:?}", source).contains("secret"));
    }
}

//! Lazily populated provider registry
//!
//! Clients are built on first use and cached for the life of the registry,
//! each paired with the single health tracker for its provider. A failed
//! construction is not cached, so a credential added later is picked up.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::{Provider, ProviderFactory};
use crate::error::ProviderError;
use crate::health_check::{HealthPolicy, HealthTracker};
use crate::models::ProviderKind;

/// A constructed client and its health tracker
#[derive(Clone)]
pub struct RegistryEntry {
    pub kind: ProviderKind,
    pub client: Arc<dyn Provider>,
    pub health: Arc<HealthTracker>,
}

impl std::fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("kind", &self.kind)
            .field("health", &self.health)
            .finish()
    }
}

/// Registry for managing provider clients
pub struct ProviderRegistry {
    factory: Arc<dyn ProviderFactory>,
    health_policy: HealthPolicy,
    entries: RwLock<HashMap<ProviderKind, RegistryEntry>>,
}

impl ProviderRegistry {
    pub fn new(factory: Arc<dyn ProviderFactory>, health_policy: HealthPolicy) -> Self {
        Self {
            factory,
            health_policy,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Cached entry for `kind`, building it on first access
    pub fn get_or_create(&self, kind: ProviderKind) -> Result<RegistryEntry, ProviderError> {
        if let Some(entry) = self.entries.read().get(&kind) {
            return Ok(entry.clone());
        }

        let client = self.factory.create(kind)?;
        let health = Arc::new(HealthTracker::new(
            kind,
            client.clone(),
            self.health_policy.clone(),
        ));

        let mut entries = self.entries.write();
        // Another caller may have raced us here; the first entry wins
        let entry = entries.entry(kind).or_insert_with(|| {
            debug!(provider = %kind, "Registered provider");
            RegistryEntry {
                kind,
                client,
                health,
            }
        });
        Ok(entry.clone())
    }

    /// Entry for `kind` if it was already built
    pub fn get(&self, kind: ProviderKind) -> Option<RegistryEntry> {
        self.entries.read().get(&kind).cloned()
    }

    pub fn is_registered(&self, kind: ProviderKind) -> bool {
        self.entries.read().contains_key(&kind)
    }

    /// Kinds built so far, in `ProviderKind` order
    pub fn registered(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<ProviderKind> = self.entries.read().keys().copied().collect();
        kinds.sort();
        kinds
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("registered", &self.registered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::{GenerateResult, Message};
    use crate::options::GenerateOptions;
    use crate::streaming::ChunkStream;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, AtomicBool, Ordering};

    struct Stub(ProviderKind);

    #[async_trait]
    impl Provider for Stub {
        fn kind(&self) -> ProviderKind {
            self.0
        }
        fn default_model(&self) -> &str {
            "stub"
        }
        fn is_available(&self) -> bool {
            true
        }
        async fn generate(
            &self,
            _messages: &[Message],
            _options: &GenerateOptions,
        ) -> Result<GenerateResult, ProviderError> {
            Err(ProviderError::new(ErrorKind::Unknown, "unused"))
        }
        async fn generate_stream(
            &self,
            _messages: &[Message],
            _options: &GenerateOptions,
        ) -> Result<ChunkStream, ProviderError> {
            Err(ProviderError::new(ErrorKind::Unknown, "unused"))
        }
    }

    #[test]
    fn test_clients_are_built_once() {
        let builds = Arc::new(AtomicU32::new(0));
        let counter = builds.clone();
        let factory = move |kind: ProviderKind| -> Result<Arc<dyn Provider>, ProviderError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Stub(kind)))
        };
        let registry = ProviderRegistry::new(Arc::new(factory), HealthPolicy::default());

        let first = registry.get_or_create(ProviderKind::Cohere).unwrap();
        let second = registry.get_or_create(ProviderKind::Cohere).unwrap();
        assert!(Arc::ptr_eq(&first.health, &second.health));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(registry.registered(), vec![ProviderKind::Cohere]);
    }

    #[test]
    fn test_failed_construction_is_not_cached() {
        let ready = Arc::new(AtomicBool::new(false));
        let flag = ready.clone();
        let factory = move |kind: ProviderKind| -> Result<Arc<dyn Provider>, ProviderError> {
            if flag.load(Ordering::SeqCst) {
                Ok(Arc::new(Stub(kind)))
            } else {
                Err(ProviderError::not_configured("no key"))
            }
        };
        let registry = ProviderRegistry::new(Arc::new(factory), HealthPolicy::default());

        assert!(registry.get_or_create(ProviderKind::OpenAi).is_err());
        assert!(!registry.is_registered(ProviderKind::OpenAi));

        ready.store(true, Ordering::SeqCst);
        assert!(registry.get_or_create(ProviderKind::OpenAi).is_ok());
        assert!(registry.get(ProviderKind::OpenAi).is_some());
    }
}

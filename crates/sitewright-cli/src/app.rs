// Application root: configuration, local settings and the provider manager

use std::sync::Arc;

use sitewright_providers::{
    ConfigurationManager, CredentialResolver, ProviderManager, ProvidersConfig,
};
use sitewright_storage::LocalSettingsStore;
use tracing::debug;

use crate::error::CliResult;

/// Everything a command needs, built once per process
pub struct AppContext {
    pub config: ProvidersConfig,
    pub settings: Arc<LocalSettingsStore>,
    pub manager: Arc<ProviderManager>,
}

impl AppContext {
    /// Load configuration files, environment and the settings store
    pub fn load() -> CliResult<Self> {
        let config = ConfigurationManager::new().load_with_precedence()?;
        let settings = Arc::new(LocalSettingsStore::open_default()?);
        debug!(path = ?settings.path(), "Opened local settings");
        Ok(Self::from_parts(config, settings))
    }

    pub fn from_parts(config: ProvidersConfig, settings: Arc<LocalSettingsStore>) -> Self {
        let manager = Arc::new(ProviderManager::from_config(
            config.clone(),
            Self::resolver(&config, &settings),
        ));
        Self {
            config,
            settings,
            manager,
        }
    }

    /// Fresh credential chain; reflects keys saved after startup
    pub fn credentials(&self) -> CredentialResolver {
        Self::resolver(&self.config, &self.settings)
    }

    fn resolver(config: &ProvidersConfig, settings: &Arc<LocalSettingsStore>) -> CredentialResolver {
        CredentialResolver::standard(config.credential_source(), settings.clone())
    }
}

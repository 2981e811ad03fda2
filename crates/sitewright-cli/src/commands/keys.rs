//! Keys command - Manage locally stored provider credentials

use std::sync::Arc;

use sitewright_providers::{CredentialResolver, ProviderKind};
use sitewright_storage::{api_key_setting, LocalSettingsStore};
use tracing::info;

use crate::commands::{parse_provider, Command};
use crate::error::{CliError, CliResult};
use crate::output::OutputStyle;

/// Keys command action
#[derive(Debug, Clone)]
pub enum KeysAction {
    /// Store a key in the local settings
    Set { provider: String, key: String },
    /// Remove a stored key
    Remove { provider: String },
    /// Show where each provider's key comes from
    List,
}

/// Keys command handler
pub struct KeysCommand {
    action: KeysAction,
    settings: Arc<LocalSettingsStore>,
    credentials: CredentialResolver,
}

impl KeysCommand {
    pub fn new(
        action: KeysAction,
        settings: Arc<LocalSettingsStore>,
        credentials: CredentialResolver,
    ) -> Self {
        Self {
            action,
            settings,
            credentials,
        }
    }

    /// Apply the action and return the lines to show
    pub fn run(&self, style: &OutputStyle) -> CliResult<Vec<String>> {
        match &self.action {
            KeysAction::Set { provider, key } => self.set_key(provider, key, style),
            KeysAction::Remove { provider } => self.remove_key(provider, style),
            KeysAction::List => Ok(self.list_keys(style)),
        }
    }

    fn set_key(&self, provider: &str, key: &str, style: &OutputStyle) -> CliResult<Vec<String>> {
        let kind = parse_provider(provider)?;
        let key = key.trim();
        if key.is_empty() {
            return Err(CliError::invalid_argument("API key must not be empty"));
        }

        self.settings.set(&api_key_setting(kind.id()), key)?;
        info!(provider = %kind, "Stored API key");

        let mut lines = vec![style.success(&format!("Saved key for {}", kind.display_name()))];
        if self.credentials.source_of(kind) == Some("environment") {
            lines.push(style.warning(
                "An environment variable also sets this key and takes precedence",
            ));
        }
        Ok(lines)
    }

    fn remove_key(&self, provider: &str, style: &OutputStyle) -> CliResult<Vec<String>> {
        let kind = parse_provider(provider)?;
        let removed = self.settings.remove(&api_key_setting(kind.id()))?;

        let line = if removed {
            info!(provider = %kind, "Removed API key");
            style.success(&format!("Removed key for {}", kind.display_name()))
        } else {
            style.info(&format!("No stored key for {}", kind.display_name()))
        };
        Ok(vec![line])
    }

    fn list_keys(&self, style: &OutputStyle) -> Vec<String> {
        let mut lines = vec![style.header("API keys")];
        for kind in ProviderKind::ALL {
            let line = match self.credentials.source_of(kind) {
                Some(source) => style.success(&format!("{:<10} from {}", kind.id(), source)),
                None => style.warning(&format!("{:<10} not set", kind.id())),
            };
            lines.push(line);
        }
        lines
    }
}

#[async_trait::async_trait]
impl Command for KeysCommand {
    async fn execute(&self) -> CliResult<()> {
        for line in self.run(&OutputStyle::default())? {
            println!("{}", line);
        }
        Ok(())
    }
}

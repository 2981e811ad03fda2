//! Providers command - Inspect AI providers and probe their health

use std::sync::Arc;

use sitewright_providers::{HealthState, ProviderHealthStatus, ProviderKind, ProviderManager};

use crate::commands::{parse_provider, Command};
use crate::error::CliResult;
use crate::output::OutputStyle;

/// Providers command action
#[derive(Debug, Clone)]
pub enum ProvidersAction {
    /// List every provider with its availability and last known health
    List,
    /// Probe one provider, or every available one
    Health { provider: Option<String> },
}

/// Providers command handler
pub struct ProvidersCommand {
    action: ProvidersAction,
    manager: Arc<ProviderManager>,
}

impl ProvidersCommand {
    pub fn new(action: ProvidersAction, manager: Arc<ProviderManager>) -> Self {
        Self { action, manager }
    }

    /// Run the action and return the lines to show
    pub async fn run(&self, style: &OutputStyle) -> CliResult<Vec<String>> {
        match &self.action {
            ProvidersAction::List => Ok(self.list_providers(style)),
            ProvidersAction::Health { provider } => {
                self.check_health(provider.as_deref(), style).await
            }
        }
    }

    fn list_providers(&self, style: &OutputStyle) -> Vec<String> {
        let settings = self.manager.settings();
        let mut lines = vec![style.header("Providers")];

        for kind in &settings.priority {
            let available = self.manager.is_available(*kind);
            let mut line = format!("{:<10} {}", kind.id(), kind.display_name());
            if settings.default_provider == Some(*kind) {
                line.push_str(" (default)");
            }

            let line = if available {
                let health = self
                    .manager
                    .health_status(*kind)
                    .map(|status| style.health(status.state))
                    .unwrap_or_else(|| style.health(HealthState::Unknown));
                style.success(&format!("{} - {}", line, health))
            } else {
                style.warning(&format!("{} - not configured", line))
            };
            lines.push(line);
        }

        if self.manager.available_providers().is_empty() {
            lines.push(String::new());
            lines.push(style.info(
                "No provider is configured. Add one with 'sitewright keys set <provider> <key>'.",
            ));
        }
        lines
    }

    async fn check_health(
        &self,
        provider: Option<&str>,
        style: &OutputStyle,
    ) -> CliResult<Vec<String>> {
        let results: Vec<(ProviderKind, ProviderHealthStatus)> = match provider {
            Some(id) => {
                let kind = parse_provider(id)?;
                vec![(kind, self.manager.check_health(kind).await?)]
            }
            None => self.manager.check_all_health().await,
        };

        if results.is_empty() {
            return Ok(vec![style.info("No provider is configured, nothing to probe.")]);
        }

        let mut lines = vec![style.header("Provider health")];
        for (kind, status) in results {
            lines.push(format_status(kind, &status, style));
        }
        Ok(lines)
    }
}

/// One line describing a probe outcome
pub fn format_status(kind: ProviderKind, status: &ProviderHealthStatus, style: &OutputStyle) -> String {
    let mut line = format!("{:<10} {}", kind.id(), style.health(status.state));
    if let Some(ms) = status.response_time_ms {
        line.push_str(&format!(" {}ms", ms));
    }
    if status.consecutive_failures > 0 {
        line.push_str(&format!(" ({} consecutive failures)", status.consecutive_failures));
    }
    if let Some(error) = &status.error_message {
        line.push_str(&format!(": {}", error));
    }
    line
}

#[async_trait::async_trait]
impl Command for ProvidersCommand {
    async fn execute(&self) -> CliResult<()> {
        for line in self.run(&OutputStyle::default()).await? {
            println!("{}", line);
        }
        Ok(())
    }
}

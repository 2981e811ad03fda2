// Command handlers for the sitewright CLI

pub mod chat;
pub mod keys;
pub mod providers;

pub use chat::ChatCommand;
pub use keys::{KeysAction, KeysCommand};
pub use providers::{ProvidersAction, ProvidersCommand};

use sitewright_providers::ProviderKind;

use crate::error::{CliError, CliResult};

/// Trait for command handlers
#[async_trait::async_trait]
pub trait Command: Send + Sync {
    /// Execute the command
    async fn execute(&self) -> CliResult<()>;
}

/// Parse a provider id given on the command line
pub fn parse_provider(id: &str) -> CliResult<ProviderKind> {
    id.parse::<ProviderKind>().map_err(|_| {
        let known: Vec<&str> = ProviderKind::ALL.iter().map(|k| k.id()).collect();
        CliError::invalid_argument(format!(
            "Unknown provider '{}'. Expected one of: {}",
            id,
            known.join(", ")
        ))
    })
}

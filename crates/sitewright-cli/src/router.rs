// Command routing and dispatch

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::app::AppContext;
use crate::commands::*;
use crate::error::CliResult;

/// Sitewright - describe a website, get a page back
#[derive(Parser, Debug)]
#[command(name = "sitewright")]
#[command(bin_name = "sitewright")]
#[command(about = "Describe a website in plain words and get a working page back")]
#[command(
    long_about = "Sitewright turns a description of a website into a working HTML page.\n\nRequests go to Google Gemini, OpenAI, Anthropic, Cohere or a local relay, with retries and a single fallback provider when one fails.\n\nQuick Start:\n  • sitewright keys set openai sk-...   Store an API key\n  • sitewright chat \"A bakery homepage\"  Generate a page\n  • sitewright chat                      Start interactive chat\n  • sitewright providers list            Show provider status"
)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Minimize output
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Chat with an AI provider to build a page
    #[command(about = "Generate a page from a prompt, or chat interactively without one")]
    Chat {
        /// Message to send; omit for interactive mode
        #[arg(value_name = "PROMPT")]
        message: Option<String>,

        /// AI provider to use (google, gemini, openai, anthropic, cohere, proxy)
        #[arg(short, long)]
        provider: Option<String>,

        /// Model to use
        #[arg(short, long)]
        model: Option<String>,

        /// Wait for the full reply instead of streaming it
        #[arg(long)]
        no_stream: bool,

        /// Send each request to the healthiest provider
        #[arg(long)]
        failover: bool,

        /// Write the generated page to this file
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Inspect AI providers
    #[command(about = "List providers and probe their health")]
    Providers {
        #[command(subcommand)]
        action: Option<ProvidersSubcommand>,
    },

    /// Manage stored API keys
    #[command(about = "Store, remove and list provider API keys")]
    Keys {
        #[command(subcommand)]
        action: KeysSubcommand,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ProvidersSubcommand {
    /// List providers with availability and health
    List,
    /// Probe one provider, or every configured one
    Health {
        #[arg(value_name = "PROVIDER")]
        provider: Option<String>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum KeysSubcommand {
    /// Store an API key in the local settings
    Set {
        #[arg(value_name = "PROVIDER")]
        provider: String,
        #[arg(value_name = "KEY")]
        key: String,
    },
    /// Remove a stored API key
    Remove {
        #[arg(value_name = "PROVIDER")]
        provider: String,
    },
    /// Show where each provider's key comes from
    List,
}

/// Command router
pub struct CommandRouter;

impl CommandRouter {
    /// Parse CLI arguments and route to appropriate handler
    pub async fn route() -> CliResult<()> {
        let cli = Cli::parse();

        // Initialize logging based on CLI flags
        crate::logging::init_logging(cli.verbose, cli.quiet);

        let context = AppContext::load()?;
        Self::execute(&cli, &context).await
    }

    /// Execute a command against an already loaded application context
    pub async fn execute(cli: &Cli, context: &AppContext) -> CliResult<()> {
        match &cli.command {
            Commands::Chat {
                message,
                provider,
                model,
                no_stream,
                failover,
                output,
            } => {
                let cmd = ChatCommand::new(context.manager.clone(), message.clone())
                    .with_provider(provider.clone())
                    .with_model(model.clone())
                    .with_stream(!*no_stream)
                    .with_failover(*failover)
                    .with_output(output.clone());
                cmd.execute().await
            }
            Commands::Providers { action } => {
                let action = match action {
                    Some(ProvidersSubcommand::List) | None => ProvidersAction::List,
                    Some(ProvidersSubcommand::Health { provider }) => ProvidersAction::Health {
                        provider: provider.clone(),
                    },
                };
                let cmd = ProvidersCommand::new(action, context.manager.clone());
                cmd.execute().await
            }
            Commands::Keys { action } => {
                let action = match action {
                    KeysSubcommand::Set { provider, key } => KeysAction::Set {
                        provider: provider.clone(),
                        key: key.clone(),
                    },
                    KeysSubcommand::Remove { provider } => KeysAction::Remove {
                        provider: provider.clone(),
                    },
                    KeysSubcommand::List => KeysAction::List,
                };
                let cmd = KeysCommand::new(action, context.settings.clone(), context.credentials());
                cmd.execute().await
            }
        }
    }
}

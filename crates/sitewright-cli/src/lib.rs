// Sitewright CLI Library

pub mod app;
pub mod chat;
pub mod commands;
pub mod error;
pub mod logging;
pub mod output;
pub mod router;

pub use app::AppContext;
pub use error::{CliError, CliResult};
pub use logging::{init_logging, VerbosityLevel};
pub use router::{Cli, CommandRouter, Commands};

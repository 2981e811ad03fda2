//! Sitewright Chat - the conversation layer between the user and the providers
//!
//! A [`ChatOrchestrator`] owns one [`Conversation`]. Each submission records
//! the user's turn, sends the recent history through the
//! [`ProviderManager`](sitewright_providers::ProviderManager), and records
//! the reply. Streamed replies grow a single placeholder message in place.
//! When no provider is usable the orchestrator answers with a fixed offline
//! page instead of failing. Any complete HTML document in a reply becomes
//! the site preview.

pub mod conversation;
pub mod error;
pub mod orchestrator;
pub mod preview;
pub mod template;

pub use conversation::{ChatMessage, Conversation, MessageStatus};
pub use error::{ChatError, ChatResult};
pub use orchestrator::{ChatOrchestrator, ChatSettings};
pub use preview::{extract_html, Preview};
pub use template::OFFLINE_TEMPLATE;

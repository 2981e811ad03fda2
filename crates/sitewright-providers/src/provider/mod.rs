//! Provider trait, registry and manager

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::models::{GenerateResult, Message, ProviderKind};
use crate::options::GenerateOptions;
pub use crate::streaming::ChunkStream;

pub mod manager;
pub mod registry;

pub use manager::{ManagerSettings, ProviderManager};
pub use registry::{ProviderRegistry, RegistryEntry};

/// Uniform interface over one upstream text-generation API
#[async_trait]
pub trait Provider: Send + Sync {
    /// Which upstream this client talks to
    fn kind(&self) -> ProviderKind;

    /// Human-readable name
    fn name(&self) -> &str {
        self.kind().display_name()
    }

    /// Model used when a request does not name one
    fn default_model(&self) -> &str;

    /// Whether the credential or configuration this client needs is present
    fn is_available(&self) -> bool;

    /// Generate a complete response
    async fn generate(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<GenerateResult, ProviderError>;

    /// Generate a response as an ordered stream of chunks
    ///
    /// The request is issued (and retried) before this returns; the stream
    /// then yields text chunks and ends with a `done` chunk carrying usage.
    async fn generate_stream(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<ChunkStream, ProviderError>;
}

/// Builds provider clients on demand
///
/// The manager asks the factory for a client the first time a provider is
/// used. Tests supply their own factory to inject scripted clients.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, kind: ProviderKind) -> Result<Arc<dyn Provider>, ProviderError>;
}

impl<F> ProviderFactory for F
where
    F: Fn(ProviderKind) -> Result<Arc<dyn Provider>, ProviderError> + Send + Sync,
{
    fn create(&self, kind: ProviderKind) -> Result<Arc<dyn Provider>, ProviderError> {
        self(kind)
    }
}

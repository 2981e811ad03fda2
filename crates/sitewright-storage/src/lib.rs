//! Sitewright storage
//!
//! Persistence for values that outlive a single run: locally stored provider
//! credentials and small user settings. This is the native counterpart of the
//! browser-local storage the web build keeps its settings in.
//!
//! Values are kept in a flat JSON object on disk:
//!
//! ```ignore
//! use sitewright_storage::LocalSettingsStore;
//!
//! let store = LocalSettingsStore::open_default()?;
//! store.set("api_key.openai", "sk-...")?;
//! assert_eq!(store.get("api_key.openai").as_deref(), Some("sk-..."));
//! ```

pub mod error;
pub mod paths;
pub mod settings;

pub use error::{IoOperation, StorageError, StorageResult};
pub use paths::PathResolver;
pub use settings::{api_key_setting, LocalSettingsStore};

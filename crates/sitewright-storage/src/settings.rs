//! Locally persisted key/value settings
//!
//! The store keeps every value in memory and writes the whole map back to disk
//! after each mutation. Writes go to a sibling temp file first and are renamed
//! into place so a crash never leaves a half-written settings file behind.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::{IoOperation, StorageError, StorageResult};
use crate::paths::PathResolver;

/// Settings key under which a provider's API key is stored
pub fn api_key_setting(provider_id: &str) -> String {
    format!("api_key.{}", provider_id)
}

/// File-backed settings store
pub struct LocalSettingsStore {
    path: Option<PathBuf>,
    values: RwLock<BTreeMap<String, String>>,
}

impl LocalSettingsStore {
    /// Open the store at `path`, loading existing values if the file exists
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        let values = if path.exists() {
            Self::read_file(&path)?
        } else {
            debug!("No settings file at {}, starting empty", path.display());
            BTreeMap::new()
        };

        Ok(Self {
            path: Some(path),
            values: RwLock::new(values),
        })
    }

    /// Open the store at the global settings location
    pub fn open_default() -> StorageResult<Self> {
        Self::open(PathResolver::settings_file()?)
    }

    /// Create a store that never touches the filesystem
    pub fn in_memory() -> Self {
        Self {
            path: None,
            values: RwLock::new(BTreeMap::new()),
        }
    }

    /// Location of the backing file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Get a value
    pub fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    /// Check whether a non-blank value is stored under `key`
    pub fn contains(&self, key: &str) -> bool {
        self.values
            .read()
            .get(key)
            .is_some_and(|value| !value.trim().is_empty())
    }

    /// Store a value and persist the store
    pub fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        if key.trim().is_empty() {
            return Err(StorageError::validation_error(key, "key cannot be empty"));
        }

        let snapshot = {
            let mut values = self.values.write();
            values.insert(key.to_string(), value.to_string());
            values.clone()
        };
        self.persist(&snapshot)
    }

    /// Remove a value and persist the store
    ///
    /// Returns whether a value was present.
    pub fn remove(&self, key: &str) -> StorageResult<bool> {
        let (removed, snapshot) = {
            let mut values = self.values.write();
            let removed = values.remove(key).is_some();
            (removed, values.clone())
        };
        if removed {
            self.persist(&snapshot)?;
        }
        Ok(removed)
    }

    /// Keys starting with `prefix`, in sorted order
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.values
            .read()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Number of stored values
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    /// Re-read values from disk, replacing the in-memory copy
    pub fn reload(&self) -> StorageResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let fresh = if path.exists() {
            Self::read_file(path)?
        } else {
            BTreeMap::new()
        };
        *self.values.write() = fresh;
        Ok(())
    }

    fn read_file(path: &Path) -> StorageResult<BTreeMap<String, String>> {
        let content = fs::read_to_string(path)
            .map_err(|e| StorageError::io_error(path.to_path_buf(), IoOperation::Read, e))?;

        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_json::from_str(&content).map_err(|e| StorageError::ParseError {
            path: path.to_path_buf(),
            format: "JSON".to_string(),
            message: e.to_string(),
        })
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> StorageResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| StorageError::DirectoryCreationFailed {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        let content = serde_json::to_string_pretty(values).map_err(|e| {
            StorageError::ParseError {
                path: path.clone(),
                format: "JSON".to_string(),
                message: e.to_string(),
            }
        })?;

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, content)
            .map_err(|e| StorageError::io_error(tmp_path.clone(), IoOperation::Write, e))?;

        if let Err(e) = fs::rename(&tmp_path, path) {
            warn!("Failed to move settings into place: {}", e);
            let _ = fs::remove_file(&tmp_path);
            return Err(StorageError::io_error(path.clone(), IoOperation::Write, e));
        }

        debug!("Persisted {} settings to {}", values.len(), path.display());
        Ok(())
    }
}

impl std::fmt::Debug for LocalSettingsStore {
    // Values may hold credentials; only keys are printed.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSettingsStore")
            .field("path", &self.path)
            .field("keys", &self.values.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

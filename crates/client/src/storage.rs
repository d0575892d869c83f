//! Persisted local state.
//!
//! A small key/value store of JSON documents, standing in for a browser's
//! local storage. Each key has exactly one writer:
//!
//! - [`keys::CREDENTIALS`] - the [`CredentialVault`](crate::credentials::CredentialVault)
//! - [`keys::USER`] - the [`SessionManager`](crate::session::SessionManager)
//! - [`keys::CART`] - the [`CartSynchronizer`](crate::cart::CartSynchronizer)
//!
//! Values that fail to decode are treated as absent: [`load`] removes the
//! offending key and returns `None`, so a corrupt file can never block startup.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Keys for persisted client state.
pub mod keys {
    /// Access/refresh credential pair.
    pub const CREDENTIALS: &str = "tokens";

    /// Last known user profile.
    pub const USER: &str = "user";

    /// Cart lines.
    pub const CART: &str = "cart";
}

/// Errors raised by a [`LocalStore`].
#[derive(Debug, Error)]
pub enum StorageError {
    /// Reading or writing the backing file failed.
    #[error("storage I/O error for `{key}`: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// The key contains characters that cannot be used as a file name.
    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    /// The value could not be serialized.
    #[error("failed to encode `{key}`: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Key/value storage for raw JSON text.
pub trait LocalStore: Send + Sync {
    /// Read the raw value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read.
    fn read(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be written.
    fn write(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove `key`. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be modified.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Shared handle to a store.
pub type SharedStore = Arc<dyn LocalStore>;

/// Load and decode the value under `key`.
///
/// Missing keys, unreadable storage and corrupt JSON all yield `None`.
/// Corrupt values are removed so the next start does not trip over them.
pub fn load<T: DeserializeOwned>(store: &dyn LocalStore, key: &str) -> Option<T> {
    let raw = match store.read(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            tracing::warn!(key, error = %e, "Failed to read persisted state");
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(key, error = %e, "Discarding corrupt persisted state");
            discard(store, key);
            None
        }
    }
}

/// Encode `value` as JSON and store it under `key`.
///
/// # Errors
///
/// Returns an error if encoding or writing fails.
pub fn save<T: Serialize + ?Sized>(
    store: &dyn LocalStore,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let raw = serde_json::to_string(value).map_err(|source| StorageError::Encode {
        key: key.to_string(),
        source,
    })?;
    store.write(key, &raw)
}

/// Remove `key`, logging instead of failing.
pub fn discard(store: &dyn LocalStore, key: &str) {
    if let Err(e) = store.remove(key) {
        tracing::warn!(key, error = %e, "Failed to remove persisted state");
    }
}

// =============================================================================
// File Store
// =============================================================================

/// Stores each key as `<dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StorageError::Io {
            key: dir.display().to_string(),
            source,
        })?;
        Ok(Self { dir })
    }

    /// Directory backing this store.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl LocalStore for FileStore {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        // Write-then-rename so a crash never leaves a half-written file behind.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)
            .and_then(|()| fs::rename(&tmp, &path))
            .map_err(|source| StorageError::Io {
                key: key.to_string(),
                source,
            })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }
}

// =============================================================================
// Memory Store
// =============================================================================

/// In-process store, used by tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store behind a shared handle.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl LocalStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

//! Persistent storage backends for session tokens.
//!
//! A `TokenStore` is a small key/value store that survives restarts. The
//! session layer writes through to it on every credential change and only
//! reads it back once per process.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use keyring::Entry;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

/// Keychain service name used for stored tokens
const KEYRING_SERVICE: &str = "taxtrack";

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

/// The two credentials a session persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKey {
    Access,
    Refresh,
}

impl TokenKey {
    /// Storage key, matching the names the web client uses.
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKey::Access => "accessToken",
            TokenKey::Refresh => "refreshToken",
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Session file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode session file: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Persistent key/value storage for tokens.
pub trait TokenStore: Send + Sync {
    /// Read a token, `None` if it was never stored or has been removed
    fn get(&self, key: TokenKey) -> Result<Option<String>, StoreError>;

    /// Store a token, replacing any previous value
    fn set(&self, key: TokenKey, value: &str) -> Result<(), StoreError>;

    /// Remove a token. Removing an absent token is not an error.
    fn remove(&self, key: TokenKey) -> Result<(), StoreError>;
}

// ============================================================================
// In-memory store
// ============================================================================

/// Process-local store. Clones share the same map, which lets tests model a
/// restart by building a fresh session over the same store.
#[derive(Clone, Default)]
pub struct MemoryTokenStore {
    tokens: Arc<RwLock<HashMap<TokenKey, String>>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, key: TokenKey) -> Result<Option<String>, StoreError> {
        let tokens = self.tokens.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tokens.get(&key).cloned())
    }

    fn set(&self, key: TokenKey, value: &str) -> Result<(), StoreError> {
        let mut tokens = self.tokens.write().unwrap_or_else(PoisonError::into_inner);
        tokens.insert(key, value.to_string());
        Ok(())
    }

    fn remove(&self, key: TokenKey) -> Result<(), StoreError> {
        let mut tokens = self.tokens.write().unwrap_or_else(PoisonError::into_inner);
        tokens.remove(&key);
        Ok(())
    }
}

// ============================================================================
// File store
// ============================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredTokens {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
}

impl StoredTokens {
    fn slot(&mut self, key: TokenKey) -> &mut Option<String> {
        match key {
            TokenKey::Access => &mut self.access_token,
            TokenKey::Refresh => &mut self.refresh_token,
        }
    }

    fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none()
    }
}

/// Stores tokens as JSON in `session.json` under the cache directory.
pub struct FileTokenStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles on the file
    lock: Mutex<()>,
}

impl FileTokenStore {
    pub fn new(cache_dir: &Path) -> Self {
        Self::with_path(cache_dir.join(SESSION_FILE))
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored tokens. An unreadable file counts as signed out so
    /// the next write replaces it.
    fn read(&self) -> Result<StoredTokens, StoreError> {
        if !self.path.exists() {
            return Ok(StoredTokens::default());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        match serde_json::from_str(&contents) {
            Ok(tokens) => Ok(tokens),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring corrupt session file");
                Ok(StoredTokens::default())
            }
        }
    }

    fn write(&self, tokens: &StoredTokens) -> Result<(), StoreError> {
        if tokens.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path)?;
            }
            return Ok(());
        }

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;
        let contents = serde_json::to_string_pretty(tokens)?;

        // Temp files are created owner-only (0600 on unix); the rename
        // replaces the old file in one step.
        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(contents.as_bytes())?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    fn update(&self, key: TokenKey, value: Option<&str>) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut tokens = self.read()?;
        *tokens.slot(key) = value.map(str::to_string);
        self.write(&tokens)
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self, key: TokenKey) -> Result<Option<String>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut tokens = self.read()?;
        Ok(tokens.slot(key).take())
    }

    fn set(&self, key: TokenKey, value: &str) -> Result<(), StoreError> {
        self.update(key, Some(value))
    }

    fn remove(&self, key: TokenKey) -> Result<(), StoreError> {
        self.update(key, None)
    }
}

// ============================================================================
// OS keychain store
// ============================================================================

/// Stores tokens in the OS keychain, one entry per token.
pub struct KeyringTokenStore {
    service: String,
}

impl KeyringTokenStore {
    pub fn new() -> Self {
        Self::with_service(KEYRING_SERVICE)
    }

    pub fn with_service(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self, key: TokenKey) -> Result<Entry, StoreError> {
        Ok(Entry::new(&self.service, key.as_str())?)
    }
}

impl Default for KeyringTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStore for KeyringTokenStore {
    fn get(&self, key: TokenKey) -> Result<Option<String>, StoreError> {
        match self.entry(key)?.get_password() {
            Ok(token) => Ok(Some(token)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: TokenKey, value: &str) -> Result<(), StoreError> {
        self.entry(key)?.set_password(value)?;
        Ok(())
    }

    fn remove(&self, key: TokenKey) -> Result<(), StoreError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => {
                debug!(key = key.as_str(), "No keychain entry to delete");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

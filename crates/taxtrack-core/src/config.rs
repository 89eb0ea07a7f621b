//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which includes the API address, the last used email, and where session
//! tokens are persisted.
//!
//! Configuration is stored at `~/.config/taxtrack/config.json`. The API
//! address can be overridden with the `TAXTRACK_API_URL` environment variable.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::ClientConfig;
use crate::auth::{FileTokenStore, KeyringTokenStore, TokenStore};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "taxtrack";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Local development API address
pub const DEFAULT_API_URL: &str = "http://localhost:3001/api";

/// Environment variable overriding the API address
pub const API_URL_ENV: &str = "TAXTRACK_API_URL";

/// Where session tokens are persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStorage {
    /// `session.json` in the cache directory
    #[default]
    File,
    /// The OS keychain
    Keyring,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub api_url: Option<String>,
    pub last_email: Option<String>,
    #[serde(default)]
    pub token_storage: TokenStorage,
}

/// Pick the API address: environment, then config file, then the default.
fn resolve_api_url(env: Option<&str>, configured: Option<&str>) -> String {
    [env, configured]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|url| !url.is_empty())
        .unwrap_or(DEFAULT_API_URL)
        .trim_end_matches('/')
        .to_string()
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// API base address after environment overrides
    pub fn api_base_url(&self) -> String {
        let env = std::env::var(API_URL_ENV).ok();
        resolve_api_url(env.as_deref(), self.api_url.as_deref())
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::new(self.api_base_url())
    }

    /// Open the configured persistent token store
    pub fn token_store(&self) -> Result<Arc<dyn TokenStore>> {
        Ok(match self.token_storage {
            TokenStorage::File => Arc::new(FileTokenStore::new(&self.cache_dir()?)),
            TokenStorage::Keyring => Arc::new(KeyringTokenStore::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_api_url_precedence() {
        assert_eq!(resolve_api_url(None, None), DEFAULT_API_URL);
        assert_eq!(
            resolve_api_url(None, Some("https://api.taxtrack.app/")),
            "https://api.taxtrack.app"
        );
        assert_eq!(
            resolve_api_url(Some("http://staging:8080/api"), Some("https://api.taxtrack.app")),
            "http://staging:8080/api"
        );
        // Blank values are ignored
        assert_eq!(resolve_api_url(Some("  "), None), DEFAULT_API_URL);
    }

    #[test]
    fn test_config_round_trip_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        // Missing file yields defaults
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.token_storage, TokenStorage::File);
        assert!(config.last_email.is_none());

        let config = Config {
            api_url: Some("https://api.taxtrack.app".to_string()),
            last_email: Some("pat@example.com".to_string()),
            token_storage: TokenStorage::Keyring,
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.last_email.as_deref(), Some("pat@example.com"));
        assert_eq!(loaded.token_storage, TokenStorage::Keyring);
    }

    #[test]
    fn test_token_storage_parses_lowercase() {
        let config: Config = serde_json::from_str(r#"{"token_storage":"keyring"}"#).unwrap();
        assert_eq!(config.token_storage, TokenStorage::Keyring);
    }
}

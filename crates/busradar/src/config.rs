//! Configuration management for busradar.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults. The
//! loaded [`Config`] is passed explicitly to every service that needs it.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "busradar";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "cache.db";

/// Environment variable prefix.
const ENV_PREFIX: &str = "BUSRADAR_";

/// Placeholder shown instead of the API token.
const REDACTED: &str = "<redacted>";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `BUSRADAR_`, sections split on `__`,
///    e.g. `BUSRADAR_API__TOKEN`)
/// 2. TOML config file at `~/.config/busradar/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote transit API configuration.
    pub api: ApiConfig,
    /// Synchronization and rate-limiting configuration.
    pub sync: SyncConfig,
    /// Local cache configuration.
    pub storage: StorageConfig,
}

/// Remote transit API configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL all endpoint paths are appended to.
    pub base_url: String,
    /// Static bearer token sent with every request.
    pub token: Option<String>,
    /// TCP/TLS connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Longest wait for data from the server in milliseconds, per read.
    pub read_timeout_ms: u64,
}

/// Synchronization configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Minimum time between two network fetches.
    pub fetch_cooldown_ms: u64,
    /// Minimum time between two cached reads.
    pub cache_cooldown_ms: u64,
    /// Default search radius in metres.
    pub radius_m: u32,
    /// Default maximum number of stops per fetch.
    pub max_count: u32,
}

/// Local cache configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/busradar/cache.db`
    pub database_path: Option<PathBuf>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.busradar.app/v1/".to_string(),
            token: None,
            connect_timeout_ms: 10_000,
            read_timeout_ms: 15_000,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fetch_cooldown_ms: 2_000,
            cache_cooldown_ms: 500,
            radius_m: 500,
            max_count: 30,
        }
    }
}

impl ApiConfig {
    /// Parse the base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL does not parse or is not http(s).
    pub fn parsed_base_url(&self) -> Result<Url> {
        let url = Url::parse(&self.base_url).map_err(|e| Error::ConfigValidation {
            message: format!("invalid base_url {:?}: {e}", self.base_url),
        })?;
        if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
            return Err(Error::ConfigValidation {
                message: format!("base_url must be an http(s) URL, got {:?}", self.base_url),
            });
        }
        Ok(url)
    }

    /// The connect timeout as a Duration.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// The request timeout as a Duration.
    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl SyncConfig {
    /// The fetch cooldown as a Duration.
    #[must_use]
    pub fn fetch_cooldown(&self) -> Duration {
        Duration::from_millis(self.fetch_cooldown_ms)
    }

    /// The cached-read cooldown as a Duration.
    #[must_use]
    pub fn cache_cooldown(&self) -> Duration {
        Duration::from_millis(self.cache_cooldown_ms)
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        self.api.parsed_base_url()?;

        if self.api.connect_timeout_ms == 0 || self.api.read_timeout_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "connect_timeout_ms and read_timeout_ms must be greater than 0"
                    .to_string(),
            });
        }

        if self.sync.fetch_cooldown_ms == 0 || self.sync.cache_cooldown_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "fetch_cooldown_ms and cache_cooldown_ms must be greater than 0"
                    .to_string(),
            });
        }

        if self.sync.cache_cooldown_ms > self.sync.fetch_cooldown_ms {
            return Err(Error::ConfigValidation {
                message: format!(
                    "cache_cooldown_ms ({}) cannot be greater than fetch_cooldown_ms ({})",
                    self.sync.cache_cooldown_ms, self.sync.fetch_cooldown_ms
                ),
            });
        }

        if self.sync.radius_m == 0 {
            return Err(Error::ConfigValidation {
                message: "radius_m must be greater than 0".to_string(),
            });
        }

        if let Some(token) = &self.api.token {
            if token.trim().is_empty() || token.chars().any(char::is_control) {
                return Err(Error::ConfigValidation {
                    message: "token must be non-blank and free of control characters"
                        .to_string(),
                });
            }
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// A copy safe to print: the token is replaced by a placeholder.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.api.token.is_some() {
            config.api.token = Some(REDACTED.to_string());
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(config.api.token.is_none());
        assert_eq!(config.sync.fetch_cooldown_ms, 2_000);
        assert_eq!(config.sync.cache_cooldown_ms, 500);
        assert!(config.storage.database_path.is_none());
    }

    #[test]
    fn test_default_api_config() {
        let api = ApiConfig::default();

        assert!(api.base_url.starts_with("https://"));
        assert_eq!(api.connect_timeout(), Duration::from_secs(10));
        assert_eq!(api.read_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn test_default_sync_config() {
        let sync = SyncConfig::default();

        assert_eq!(sync.fetch_cooldown(), Duration::from_secs(2));
        assert_eq!(sync.cache_cooldown(), Duration::from_millis(500));
        assert_eq!(sync.radius_m, 500);
        assert_eq!(sync.max_count, 30);
    }

    #[test]
    fn test_validate_valid_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_bad_base_url() {
        let mut config = Config::default();
        config.api.base_url = "not a url".to_string();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("base_url"));

        config.api.base_url = "ftp://example.org/".to_string();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("http(s)"));

        config.api.base_url = "mailto:someone@example.org".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_timeouts() {
        let mut config = Config::default();
        config.api.read_timeout_ms = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("read_timeout_ms"));
    }

    #[test]
    fn test_validate_zero_cooldown() {
        let mut config = Config::default();
        config.sync.fetch_cooldown_ms = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("fetch_cooldown_ms"));
    }

    #[test]
    fn test_validate_cache_cooldown_longer_than_fetch() {
        let mut config = Config::default();
        config.sync.cache_cooldown_ms = 5_000;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("cache_cooldown_ms"));
    }

    #[test]
    fn test_validate_zero_radius() {
        let mut config = Config::default();
        config.sync.radius_m = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_blank_token() {
        let mut config = Config::default();
        config.api.token = Some("  ".to_string());
        assert!(config.validate().is_err());

        config.api.token = Some("abc\ndef".to_string());
        assert!(config.validate().is_err());

        config.api.token = Some("eyJhbGciOiJIUzI1NiJ9".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_database_path_default() {
        let config = Config::default();
        let path = config.database_path();

        assert!(path.to_string_lossy().contains("cache.db"));
    }

    #[test]
    fn test_database_path_custom() {
        let mut config = Config::default();
        config.storage.database_path = Some(PathBuf::from("/custom/path/db.sqlite"));

        assert_eq!(
            config.database_path(),
            PathBuf::from("/custom/path/db.sqlite")
        );
    }

    #[test]
    fn test_redacted_hides_token() {
        let mut config = Config::default();
        assert_eq!(config.redacted(), config);

        config.api.token = Some("secret".to_string());
        let redacted = config.redacted();
        assert_eq!(redacted.api.token.as_deref(), Some(REDACTED));
        assert!(!serde_json::to_string(&redacted).unwrap().contains("secret"));
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("busradar"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        // Loading from a nonexistent path should work (uses defaults)
        let result = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml")));
        assert!(result.is_ok());

        let config = result.unwrap();
        assert_eq!(config.sync, SyncConfig::default());
    }

    #[test]
    fn test_load_from_toml_file() {
        let path = std::env::temp_dir().join(format!("busradar_config_{}.toml", std::process::id()));
        std::fs::write(
            &path,
            "[api]\nbase_url = \"http://localhost:8080/api/\"\n\n[sync]\nradius_m = 750\n",
        )
        .unwrap();

        let config = Config::load_from(Some(path.clone())).unwrap();
        assert_eq!(config.api.base_url, "http://localhost:8080/api/");
        assert_eq!(config.sync.radius_m, 750);
        assert_eq!(config.sync.fetch_cooldown_ms, 2_000);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_sync_config_deserialize_partial() {
        let json = r#"{"fetch_cooldown_ms": 3000}"#;
        let sync: SyncConfig = serde_json::from_str(json).unwrap();
        assert_eq!(sync.fetch_cooldown_ms, 3000);
        assert_eq!(sync.cache_cooldown_ms, 500);
    }
}

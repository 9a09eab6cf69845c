//! Configuration for the transcript store, the asset cache and the server.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::assets::{DEFAULT_EXCLUSION_MARKERS, NetworkFailurePolicy};
use crate::error::Result;

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "WEBCHAT_CONFIG";

const APP_DIR: &str = "webchat-offline";

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Where and how transcripts are persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding all databases.
    pub data_dir: PathBuf,
    /// Database name (a subdirectory of `data_dir`).
    pub database: String,
    /// Record container holding the transcript.
    pub container: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database: "webchat-db".to_string(),
            container: crate::transcript::HISTORY_CONTAINER.to_string(),
        }
    }
}

impl StorageConfig {
    /// Returns the directory of the configured database.
    #[must_use]
    pub fn database_dir(&self) -> PathBuf {
        self.data_dir.join(&self.database)
    }

    /// Sets the data directory.
    #[must_use]
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Sets the database name.
    #[must_use]
    pub fn with_database(mut self, name: impl Into<String>) -> Self {
        self.database = name.into();
        self
    }
}

/// Asset cache controller settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Build/deploy version; the cache generation is named `cache-<version>`.
    pub version: String,
    /// Origin the app is served from, e.g. `http://127.0.0.1:5173`.
    pub origin: String,
    /// Directory holding cache generations on disk.
    pub cache_dir: PathBuf,
    /// JSON file listing manifest paths.
    pub manifest: Option<PathBuf>,
    /// Build output directory scanned for manifest paths when `manifest` is unset.
    pub build_dir: Option<PathBuf>,
    /// Prefix prepended to scanned paths (e.g. `/app` when served under a subpath).
    pub base_path: String,
    /// Case-insensitive path fragments that are never cached.
    pub exclusion_markers: Vec<String>,
    /// What to do when the network fails for a manifest asset.
    pub network_failure: NetworkFailurePolicy,
    /// Whether successful CORS responses may be cached.
    pub cache_non_basic: bool,
    /// Activate a freshly installed generation without waiting.
    pub skip_waiting: bool,
    /// Maximum number of manifest fetches in flight during install.
    pub concurrent_fetches: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            origin: "http://127.0.0.1:5173".to_string(),
            cache_dir: default_data_dir().join("caches"),
            manifest: None,
            build_dir: None,
            base_path: String::new(),
            exclusion_markers: DEFAULT_EXCLUSION_MARKERS
                .iter()
                .map(|m| (*m).to_string())
                .collect(),
            network_failure: NetworkFailurePolicy::default(),
            cache_non_basic: false,
            skip_waiting: true,
            concurrent_fetches: 8,
        }
    }
}

impl CacheConfig {
    /// Sets the deploy version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Sets the app origin.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Sets the on-disk cache directory.
    #[must_use]
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Sets the network failure policy.
    #[must_use]
    pub const fn with_network_failure(mut self, policy: NetworkFailurePolicy) -> Self {
        self.network_failure = policy;
        self
    }

    /// Sets whether an installed generation activates immediately.
    #[must_use]
    pub const fn with_skip_waiting(mut self, skip: bool) -> Self {
        self.skip_waiting = skip;
        self
    }

    /// Sets the install fetch concurrency.
    #[must_use]
    pub const fn with_concurrent_fetches(mut self, n: usize) -> Self {
        self.concurrent_fetches = n;
        self
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    /// Returns the config file location: `$WEBCHAT_CONFIG`, or
    /// `<config_dir>/webchat-offline/config.toml`.
    #[must_use]
    pub fn default_path() -> PathBuf {
        std::env::var_os(CONFIG_ENV).map_or_else(
            || {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(APP_DIR)
                    .join("config.toml")
            },
            PathBuf::from,
        )
    }

    /// Loads the config at `path`, writing a default template first if the
    /// file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or created.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            log::info!("Wrote default config to {}", path.display());
            return Ok(config);
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Saves the config atomically (write tmp + rename).
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("toml.tmp");
        std::fs::write(&tmp_path, toml::to_string_pretty(self)?)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_storage_config() {
        let config = StorageConfig::default();
        assert_eq!(config.database, "webchat-db");
        assert_eq!(config.container, "history");
        assert!(config.data_dir.to_string_lossy().contains("webchat-offline"));
        assert!(config.database_dir().ends_with("webchat-db"));
    }

    #[test]
    fn default_cache_config() {
        let config = CacheConfig::default();
        assert_eq!(config.version, env!("CARGO_PKG_VERSION"));
        assert!(config.exclusion_markers.iter().any(|m| m == "tokenizer"));
        assert_eq!(config.network_failure, NetworkFailurePolicy::FallbackToCache);
        assert!(!config.cache_non_basic);
        assert!(config.skip_waiting);
    }

    #[test]
    fn cache_config_builder_pattern() {
        let config = CacheConfig::default()
            .with_version("v2")
            .with_origin("https://chat.example")
            .with_network_failure(NetworkFailurePolicy::Propagate)
            .with_skip_waiting(false)
            .with_concurrent_fetches(2);

        assert_eq!(config.version, "v2");
        assert_eq!(config.origin, "https://chat.example");
        assert_eq!(config.network_failure, NetworkFailurePolicy::Propagate);
        assert!(!config.skip_waiting);
        assert_eq!(config.concurrent_fetches, 2);
    }

    #[test]
    fn default_server_config() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8787);
    }

    #[test]
    fn app_config_serializes_to_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(deserialized, config);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [cache]
            version = "abc123"
            network_failure = "propagate"
            "#,
        )
        .unwrap();
        assert_eq!(config.cache.version, "abc123");
        assert_eq!(config.cache.network_failure, NetworkFailurePolicy::Propagate);
        assert_eq!(config.server.port, 8787);
        assert_eq!(config.storage.container, "history");
    }

    #[test]
    fn load_or_create_writes_template() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let created = AppConfig::load_or_create(&path).unwrap();
        assert!(path.exists());

        let loaded = AppConfig::load_or_create(&path).unwrap();
        assert_eq!(loaded, created);
    }

    #[test]
    fn load_rejects_malformed_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[cache\nversion=").unwrap();
        assert!(matches!(
            AppConfig::load_or_create(&path),
            Err(crate::Error::Config(_))
        ));
    }
}

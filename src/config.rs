use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;

/// Application configuration loaded from TOML config file.
/// Every field has a default, so the config file is optional.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Custom database path (overrides XDG default).
    pub db_path: Option<PathBuf>,
    /// Skip ratio above which an upload logs a stale-mapping warning.
    pub stale_mapping_warn_ratio: f64,
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub query: QueryConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            stale_mapping_warn_ratio: 0.5,
            server: ServerConfig::default(),
            cache: CacheConfig::default(),
            query: QueryConfig::default(),
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on.
    pub bind: String,
    /// Upload body limit in megabytes.
    pub max_upload_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
            max_upload_mb: 10,
        }
    }
}

impl ServerConfig {
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

/// Catalog metadata cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entry lifetime in seconds.
    pub ttl_secs: u64,
    /// Width of the time bucket folded into catalog keys.
    pub bucket_secs: u64,
    /// Upper bound on live entries.
    pub max_entries: usize,
    /// How often the server sweeps expired entries.
    pub reap_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            bucket_secs: 300,
            max_entries: 1024,
            reap_interval_secs: 60,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs.max(1))
    }
}

/// Analytics query limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Result size when the caller passes no limit (or 0).
    pub default_limit: usize,
    /// Larger requested limits are clamped to this.
    pub max_limit: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: 50,
            max_limit: 500,
        }
    }
}

impl QueryConfig {
    /// 0/absent → default, anything above the cap → cap. The result is
    /// always in `1..=max(max_limit, 1)`, whatever the config says.
    pub fn resolve_limit(&self, requested: Option<usize>) -> usize {
        let cap = self.max_limit.max(1);
        match requested {
            None | Some(0) => self.default_limit.clamp(1, cap),
            Some(n) => n.min(cap),
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/streamtally/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match Self::from_toml(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME).map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default database path using XDG data directory.
pub fn default_db_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("streamtally.db")
    } else {
        // Fallback: current directory
        PathBuf::from("streamtally.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert!(config.db_path.is_none());
        assert_eq!(config.stale_mapping_warn_ratio, 0.5);
        assert_eq!(config.query.default_limit, 50);
        assert_eq!(config.server.max_upload_bytes(), 10 * 1024 * 1024);
    }

    #[test]
    fn test_partial_sections() {
        let config = AppConfig::from_toml(
            r#"
            db_path = "/tmp/tally.db"

            [cache]
            ttl_secs = 30

            [query]
            max_limit = 100
            "#,
        )
        .unwrap();
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/tally.db")));
        assert_eq!(config.cache.ttl(), Duration::from_secs(30));
        assert_eq!(config.cache.bucket_secs, 300);
        assert_eq!(config.query.max_limit, 100);
        assert_eq!(config.query.default_limit, 50);
        assert_eq!(config.server.bind, "127.0.0.1:3000");
    }

    #[test]
    fn test_resolve_limit() {
        let query = QueryConfig::default();
        assert_eq!(query.resolve_limit(None), 50);
        assert_eq!(query.resolve_limit(Some(0)), 50);
        assert_eq!(query.resolve_limit(Some(7)), 7);
        assert_eq!(query.resolve_limit(Some(10_000)), 500);
    }

    #[test]
    fn test_resolve_limit_normalizes_bad_default() {
        let zero = QueryConfig { default_limit: 0, max_limit: 500 };
        assert_eq!(zero.resolve_limit(None), 1);
        assert_eq!(zero.resolve_limit(Some(0)), 1);

        let above_cap = QueryConfig { default_limit: 1000, max_limit: 100 };
        assert_eq!(above_cap.resolve_limit(None), 100);
        assert_eq!(above_cap.resolve_limit(Some(7)), 7);

        let no_cap = QueryConfig { default_limit: 0, max_limit: 0 };
        assert_eq!(no_cap.resolve_limit(None), 1);
        assert_eq!(no_cap.resolve_limit(Some(9)), 1);
    }

    #[test]
    fn test_malformed_toml_is_error() {
        assert!(AppConfig::from_toml("[query\nmax_limit = ").is_err());
    }
}

//! Configuration
//!
//! Cache defaults, autolinker timing and logging, read from TOML with
//! `RELCACHE_*` environment overrides on top.

use crate::model::{Paging, SortSpec};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration; every section is optional
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub autolinker: AutolinkerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Window defaults and event plumbing
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_rpp")]
    pub default_rpp: usize,

    #[serde(default = "default_page")]
    pub default_page: usize,

    #[serde(default = "default_sort")]
    pub default_sort: Vec<String>,

    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_rpp() -> usize {
    10
}

fn default_page() -> usize {
    1
}

fn default_sort() -> Vec<String> {
    vec!["id".to_string()]
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_rpp: default_rpp(),
            default_page: default_page(),
            default_sort: default_sort(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl CacheConfig {
    /// Paging a new window starts with
    ///
    /// An unparsable `default_sort` falls back to sorting by `id`.
    pub fn default_paging(&self) -> Paging {
        let sort = SortSpec::try_from(self.default_sort.clone()).unwrap_or_else(|e| {
            tracing::warn!("Invalid default sort {:?}: {}", self.default_sort, e);
            SortSpec::default()
        });
        Paging::new(self.default_rpp.max(1), self.default_page.max(1), sort)
    }
}

/// Background gap filling
#[derive(Debug, Clone, Deserialize)]
pub struct AutolinkerConfig {
    #[serde(default = "default_autolinker_enabled")]
    pub enabled: bool,

    #[serde(default = "default_autolink_interval")]
    pub interval_ms: u64,
}

fn default_autolinker_enabled() -> bool {
    true
}

fn default_autolink_interval() -> u64 {
    50
}

impl Default for AutolinkerConfig {
    fn default() -> Self {
        Self {
            enabled: default_autolinker_enabled(),
            interval_ms: default_autolink_interval(),
        }
    }
}

impl AutolinkerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// Parse `path` without environment overrides
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Parse `path`, then apply environment overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// First readable file among `search_paths()`, else `from_env()`
    pub fn load_default() -> Self {
        for path in search_paths().into_iter().filter(|p| p.exists()) {
            match Self::load_with_env(&path) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "Loaded config");
                    return config;
                }
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping config file"),
            }
        }

        tracing::info!("No config file found, using defaults");
        Self::from_env()
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(rpp) = std::env::var("RELCACHE_DEFAULT_RPP") {
            if let Ok(n) = rpp.parse() {
                self.cache.default_rpp = n;
            }
        }

        if let Ok(interval) = std::env::var("RELCACHE_AUTOLINK_INTERVAL_MS") {
            if let Ok(ms) = interval.parse() {
                self.autolinker.interval_ms = ms;
            }
        }

        if let Ok(level) = std::env::var("RELCACHE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("RELCACHE_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Invalid config in {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Where `load_default` looks, in order
pub fn search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("relcache").join("config.toml"));
    }
    paths.push(PathBuf::from("/etc/relcache/config.toml"));
    paths.push(PathBuf::from("config.toml"));
    paths
}

/// Commented default config, as written by `relcache init-config`
pub fn generate_default_config() -> String {
    r#"# Relcache Configuration
#
# Overridden by:
# - RELCACHE_DEFAULT_RPP
# - RELCACHE_AUTOLINK_INTERVAL_MS
# - RELCACHE_LOG_LEVEL
# - RELCACHE_LOG_FORMAT

[cache]
# Rows per page of a new window
default_rpp = 10

# First page shown by a new window (1-based)
default_page = 1

# Sort of a new window: "field" or "field desc"
default_sort = ["id"]

# Events buffered per subscriber before the slowest one lags
event_capacity = 1024

[autolinker]
# Fetch records and links that lookups missed
enabled = true

# Poll interval when no miss wakes it earlier (ms)
interval_ms = 50

[logging]
# trace, debug, info, warn or error
level = "info"

# pretty or json
format = "pretty"

# Optional log file path
# file = "/var/log/relcache/relcache.log"
"#
    .to_string()
}

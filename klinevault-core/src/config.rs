//! TOML run configuration.
//!
//! Every section has defaults, so an empty file (or no file at all) is a valid
//! configuration.

use crate::data::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub ingest: IngestOptions,
    pub watch: WatchConfig,
}

/// Exchange endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// REST root, without a trailing path
    pub base_url: String,

    /// Per-request timeout
    pub timeout_secs: u64,

    /// Optional HTTP(S) proxy URL for every request
    pub proxy: Option<String>,

    /// Rows returned by one kline call at most
    pub page_limit: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.binance.com".into(),
            timeout_secs: 30,
            proxy: None,
            page_limit: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the flat window store
    pub data_dir: PathBuf,

    /// SQLite completion journal
    pub journal_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            journal_path: PathBuf::from("data/journal.sqlite"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestOptions {
    /// Quote asset used to pick symbols from the universe
    pub quote_asset: String,

    /// Parallel symbol workers
    pub workers: usize,

    /// Delays between fetch attempts; empty means a single attempt
    pub retry_delays_secs: Vec<u64>,

    /// Skip windows that already have a final outcome
    pub ignore_exists: bool,

    /// Explicit symbol list; overrides the universe when set
    pub symbols: Option<Vec<String>>,

    /// Saved exchange-info document used instead of a remote listing
    pub exchange_info: Option<PathBuf>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            quote_asset: "USDT".into(),
            workers: 1,
            retry_delays_secs: vec![2, 4, 8, 16],
            ignore_exists: true,
            symbols: None,
            exchange_info: None,
        }
    }
}

impl IngestOptions {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_secs(&self.retry_delays_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Sleep increment while waiting for the next boundary
    pub poll_interval_secs: u64,

    /// Closed days re-checked on every cycle
    pub lookback_days: u32,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            lookback_days: 2,
        }
    }
}

impl IngestConfig {
    /// Load and validate a configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a configuration string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ingest.workers == 0 {
            return Err(ConfigError::Invalid("ingest.workers must be at least 1".into()));
        }
        if self.api.page_limit == 0 {
            return Err(ConfigError::Invalid("api.page_limit must be at least 1".into()));
        }
        if self.watch.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "watch.poll_interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = IngestConfig::from_toml("").unwrap();
        assert_eq!(config, IngestConfig::default());
        assert_eq!(config.api.page_limit, 1000);
        assert_eq!(config.ingest.retry_policy().max_attempts(), 5);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = IngestConfig::from_toml(
            r#"
            [api]
            proxy = "http://127.0.0.1:7890"

            [ingest]
            workers = 4
            retry_delays_secs = [1, 1]
            symbols = ["BTCUSDT", "ETHUSDT"]

            [storage]
            data_dir = "/var/lib/klinevault"
            "#,
        )
        .unwrap();

        assert_eq!(config.api.proxy.as_deref(), Some("http://127.0.0.1:7890"));
        assert_eq!(config.api.base_url, "https://api.binance.com");
        assert_eq!(config.ingest.workers, 4);
        assert_eq!(
            config.ingest.retry_policy().delays(),
            &[Duration::from_secs(1), Duration::from_secs(1)]
        );
        assert_eq!(config.ingest.symbols.as_ref().map(Vec::len), Some(2));
        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/klinevault"));
        assert_eq!(
            config.storage.journal_path,
            PathBuf::from("data/journal.sqlite")
        );
    }

    #[test]
    fn empty_retry_schedule_is_legal() {
        let config = IngestConfig::from_toml("[ingest]\nretry_delays_secs = []").unwrap();
        assert_eq!(config.ingest.retry_policy().max_attempts(), 1);
    }

    #[test]
    fn zero_workers_is_rejected() {
        assert!(matches!(
            IngestConfig::from_toml("[ingest]\nworkers = 0"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn zero_page_limit_is_rejected() {
        assert!(matches!(
            IngestConfig::from_toml("[api]\npage_limit = 0"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn bad_toml_is_a_parse_error() {
        assert!(matches!(
            IngestConfig::from_toml("[ingest\nworkers = 2"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        assert!(matches!(
            IngestConfig::from_file(Path::new("/nonexistent/klinevault.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}

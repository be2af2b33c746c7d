//! Configuration for the aggregation engine

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// RocksDB configuration
    pub rocksdb: RocksDbConfig,

    /// Ledger scan configuration
    pub scan: ScanConfig,

    /// Reconciliation configuration
    pub backfill: BackfillConfig,

    /// Query cache configuration
    pub cache: CacheConfig,

    /// Stock threshold configuration
    pub stock: StockConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/tally"),
            service_name: "tally-core".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            rocksdb: RocksDbConfig::default(),
            scan: ScanConfig::default(),
            backfill: BackfillConfig::default(),
            cache: CacheConfig::default(),
            stock: StockConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksDbConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Target file size (MB)
    pub target_file_size_mb: u64,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            target_file_size_mb: 64,
            max_background_jobs: 4,
        }
    }
}

/// Ledger scan configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Page size for paginated ledger scans (entries)
    pub page_size: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self { page_size: 500 }
    }
}

/// Reconciliation (backfill) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillConfig {
    /// Per-batch write-count ceiling for daily aggregate commits
    pub max_batch_writes: usize,

    /// Default trailing window when no start date is given (months)
    pub default_window_months: u32,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            max_batch_writes: 100,
            default_window_months: 12,
        }
    }
}

/// Query cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entry time-to-live (seconds)
    pub ttl_secs: u64,

    /// Disable to bypass caching entirely (tests, debugging)
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            enabled: true,
        }
    }
}

/// Stock threshold configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockConfig {
    /// Fallback minimum for materials without an explicit threshold
    pub default_minimum: Decimal,

    /// Per-material minimum quantities
    #[serde(default)]
    pub minimums: HashMap<String, Decimal>,
}

impl Default for StockConfig {
    fn default() -> Self {
        Self {
            default_minimum: Decimal::TEN,
            minimums: HashMap::new(),
        }
    }
}

impl StockConfig {
    /// Minimum for a material, falling back to the default
    pub fn minimum_for(&self, material: &str) -> Decimal {
        self.minimums
            .get(material)
            .copied()
            .unwrap_or(self.default_minimum)
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("TALLY_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(ttl) = std::env::var("TALLY_CACHE_TTL_SECS") {
            config.cache.ttl_secs = ttl
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid TALLY_CACHE_TTL_SECS: {}", e)))?;
        }

        if let Ok(page_size) = std::env::var("TALLY_SCAN_PAGE_SIZE") {
            config.scan.page_size = page_size
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid TALLY_SCAN_PAGE_SIZE: {}", e)))?;
        }

        Ok(config)
    }
}

//! Configuration for the FundPro engine.
//!
//! The engine reads a single JSON file at `~/.fundpro/config.json`. Every field
//! has a serde default, so an empty (or missing) file yields a working setup.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (`FUNDPRO_*` prefix)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `FUNDPRO_LOG_LEVEL` → observability.log_level
//! - `FUNDPRO_LOG_FORMAT` → observability.log_format
//! - `FUNDPRO_DB_PATH` → storage.db_path
//!
//! # Example
//!
//! ```json
//! {
//!   "estimate": { "correction_factor": 1.2, "top_n": 10 },
//!   "attribution": { "min_coverage": 0.5, "ttl_days": 30 },
//!   "refresh": {
//!     "enabled": true,
//!     "schedule": "0 0 2 * * *",
//!     "funds": ["161725", "005827"]
//!   },
//!   "sync": { "interval_days": 30, "request_delay_ms": 500 },
//!   "market": { "holidays": ["2026-10-01", "2026-10-02"] }
//! }
//! ```

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".fundpro"),
        |dirs| dirs.home_dir().join(".fundpro"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Real-time estimate tuning
    #[serde(default)]
    pub estimate: EstimateConfig,

    /// Sector attribution tuning
    #[serde(default)]
    pub attribution: AttributionConfig,

    /// Scheduled attribution refresh
    #[serde(default)]
    pub refresh: RefreshConfig,

    /// Holdings sync from the disclosure source
    #[serde(default)]
    pub sync: SyncConfig,

    /// A-share market calendar
    #[serde(default)]
    pub market: MarketConfig,

    /// Collaborator call budgets
    #[serde(default)]
    pub service: ServiceConfig,

    /// Local SQLite storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Sector table overrides
    #[serde(default)]
    pub sectors: SectorsConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration and apply `FUNDPRO_*` environment overrides.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("FUNDPRO_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Ok(format) = std::env::var("FUNDPRO_LOG_FORMAT") {
            self.observability.log_format = format;
        }
        if let Ok(path) = std::env::var("FUNDPRO_DB_PATH") {
            self.storage.db_path = Some(PathBuf::from(path));
        }
    }

    /// Resolved SQLite database path.
    pub fn db_path(&self) -> PathBuf {
        self.storage
            .db_path
            .clone()
            .unwrap_or_else(|| config_dir().join("fundpro.db"))
    }
}

// ============================================================================
// Observability
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

// ============================================================================
// Estimate
// ============================================================================

/// Real-time estimate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimateConfig {
    /// Multiplier projecting the undisclosed part of the portfolio onto the
    /// disclosed top-N move. Must be greater than 1.
    #[serde(default = "default_correction_factor")]
    pub correction_factor: f64,

    /// Number of top holdings used for the estimate
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

impl Default for EstimateConfig {
    fn default() -> Self {
        Self {
            correction_factor: default_correction_factor(),
            top_n: default_top_n(),
        }
    }
}

// ============================================================================
// Attribution
// ============================================================================

/// Sector attribution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionConfig {
    /// Minimum share (0..=1) of disclosed weight that must resolve to a
    /// known sector before confidence is reported at face value
    #[serde(default = "default_min_coverage")]
    pub min_coverage: f64,

    /// Days before a cached attribution is considered stale
    #[serde(default = "default_ttl_days")]
    pub ttl_days: i64,

    /// Number of holdings named in the justification
    #[serde(default = "default_justification_holdings")]
    pub justification_holdings: usize,

    /// Budget for waiting on an in-flight recomputation
    #[serde(default = "default_refresh_timeout_secs")]
    pub refresh_timeout_secs: u64,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            min_coverage: default_min_coverage(),
            ttl_days: default_ttl_days(),
            justification_holdings: default_justification_holdings(),
            refresh_timeout_secs: default_refresh_timeout_secs(),
        }
    }
}

// ============================================================================
// Refresh schedule
// ============================================================================

/// Scheduled attribution refresh configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Run the refresh scheduler
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Cron expression (with seconds field) for refresh runs
    #[serde(default = "default_refresh_schedule")]
    pub schedule: String,

    /// Fund codes refreshed on every run
    #[serde(default)]
    pub funds: Vec<String>,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: default_refresh_schedule(),
            funds: Vec::new(),
        }
    }
}

// ============================================================================
// Holdings sync
// ============================================================================

/// Holdings sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Fetch disclosed holdings before each refresh run and at startup
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Days a stored snapshot is trusted before it is fetched again
    #[serde(default = "default_sync_interval_days")]
    pub interval_days: i64,

    /// Pause between consecutive fund fetches
    #[serde(default = "default_sync_request_delay_ms")]
    pub request_delay_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_days: default_sync_interval_days(),
            request_delay_ms: default_sync_request_delay_ms(),
        }
    }
}

// ============================================================================
// Market
// ============================================================================

/// A-share market calendar configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MarketConfig {
    /// Exchange holidays falling on weekdays
    #[serde(default)]
    pub holidays: Vec<NaiveDate>,
}

// ============================================================================
// Service
// ============================================================================

/// Collaborator call budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Timeout applied to each holdings/net value/market status call
    #[serde(default = "default_collaborator_timeout_secs")]
    pub collaborator_timeout_secs: u64,

    /// HTTP timeout for the remote quote and net value sources
    #[serde(default = "default_quote_timeout_secs")]
    pub quote_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            collaborator_timeout_secs: default_collaborator_timeout_secs(),
            quote_timeout_secs: default_quote_timeout_secs(),
        }
    }
}

// ============================================================================
// Storage
// ============================================================================

/// Local storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// SQLite database file (default: ~/.fundpro/fundpro.db)
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

// ============================================================================
// Sectors
// ============================================================================

/// A sector entry as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorEntry {
    /// Sector board code (e.g. "BK0438")
    pub code: String,
    /// Sector display name
    pub name: String,
}

/// Sector table overrides keyed by 6-digit stock code.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SectorsConfig {
    #[serde(default)]
    pub overrides: HashMap<String, SectorEntry>,
}

// ============================================================================
// Defaults
// ============================================================================

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "pretty".into()
}
fn default_true() -> bool {
    true
}
fn default_correction_factor() -> f64 {
    1.2
}
fn default_top_n() -> usize {
    10
}
fn default_min_coverage() -> f64 {
    0.5
}
fn default_ttl_days() -> i64 {
    30
}
fn default_justification_holdings() -> usize {
    3
}
fn default_refresh_timeout_secs() -> u64 {
    15
}
fn default_refresh_schedule() -> String {
    "0 0 2 * * *".into()
}
fn default_sync_interval_days() -> i64 {
    30
}
fn default_sync_request_delay_ms() -> u64 {
    500
}
fn default_collaborator_timeout_secs() -> u64 {
    10
}
fn default_quote_timeout_secs() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.estimate.correction_factor, 1.2);
        assert_eq!(config.estimate.top_n, 10);
        assert_eq!(config.attribution.min_coverage, 0.5);
        assert_eq!(config.attribution.ttl_days, 30);
        assert_eq!(config.observability.log_format, "pretty");
        assert!(config.refresh.enabled);
        assert!(config.refresh.funds.is_empty());
        assert!(config.sync.enabled);
        assert_eq!(config.sync.interval_days, 30);
        assert_eq!(config.sync.request_delay_ms, 500);
    }

    #[test]
    fn test_partial_sections() {
        let json = r#"{
            "estimate": { "correction_factor": 1.35 },
            "market": { "holidays": ["2026-10-01"] },
            "sectors": { "overrides": { "600519": { "code": "BK0438", "name": "食品饮料" } } }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.estimate.correction_factor, 1.35);
        assert_eq!(config.estimate.top_n, 10);
        assert_eq!(
            config.market.holidays,
            vec![NaiveDate::from_ymd_opt(2026, 10, 1).unwrap()]
        );
        assert_eq!(config.sectors.overrides["600519"].code, "BK0438");
    }

    #[test]
    fn test_observability_aliases() {
        let json = r#"{ "observability": { "level": "debug", "format": "json" } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.observability.log_level, "debug");
        assert_eq!(config.observability.log_format, "json");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "refresh": { "funds": ["161725"] } }"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.refresh.funds, vec!["161725".to_string()]);
    }

    #[test]
    fn test_load_from_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "not json").unwrap();

        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_db_path_override() {
        let mut config = Config::default();
        assert!(config.db_path().ends_with("fundpro.db"));

        config.storage.db_path = Some(PathBuf::from("/tmp/custom.db"));
        assert_eq!(config.db_path(), PathBuf::from("/tmp/custom.db"));
    }
}

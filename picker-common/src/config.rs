//! Configuration management for the Picker scanner.
//!
//! The scanner reads a single configuration file at `~/.picker/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (PICKER_* prefix)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `PICKER_LOG_LEVEL` → observability.log_level
//! - `PICKER_LOG_FORMAT` → observability.log_format
//! - `PICKER_FEED_URL` → feed.base_url (also switches feed.kind to `http`)
//! - `PICKER_FEED_API_KEY` → feed.api_key
//! - `PICKER_ACCOUNT_SIZE` → risk.account_size

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".picker"),
        |dirs| dirs.home_dir().join(".picker"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Expand a leading `~` in a configured path.
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// JSON Schema reference
    #[serde(rename = "$schema", default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Market data feed configuration
    #[serde(default)]
    pub feed: FeedConfig,

    /// Scanner criteria and tuning (every field optional)
    #[serde(default)]
    pub scanner: Option<ScannerSettings>,

    /// Account risk parameters (every field optional)
    #[serde(default)]
    pub risk: Option<RiskSettings>,

    /// Scheduled scanning
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Report output
    #[serde(default)]
    pub output: OutputConfig,
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

    /// Load configuration with environment variable overrides applied.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("PICKER_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Ok(format) = std::env::var("PICKER_LOG_FORMAT") {
            self.observability.log_format = format;
        }

        if let Ok(url) = std::env::var("PICKER_FEED_URL") {
            self.feed.base_url = Some(url);
            self.feed.kind = FeedKind::Http;
        }
        if let Ok(key) = std::env::var("PICKER_FEED_API_KEY") {
            self.feed.api_key = Some(key);
        }

        if let Ok(size) = std::env::var("PICKER_ACCOUNT_SIZE") {
            if let Ok(size) = size.parse::<f64>() {
                self.risk.get_or_insert_with(RiskSettings::default).account_size = Some(size);
            }
        }
    }
}

// ============================================================================
// Observability
// ============================================================================

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets pinned to `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

// ============================================================================
// Market Data Feed
// ============================================================================

/// Which feed implementation the scanner talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    /// JSON fixture file loaded into memory
    #[default]
    Static,
    /// REST JSON market data service
    Http,
}

/// Market data feed configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default)]
    pub kind: FeedKind,

    /// Fixture path for the static feed
    #[serde(default)]
    pub fixture_path: Option<String>,

    /// Base URL for the HTTP feed (e.g., "http://127.0.0.1:8600")
    #[serde(default)]
    pub base_url: Option<String>,

    /// Bearer token sent to the HTTP feed
    #[serde(default)]
    pub api_key: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_feed_timeout")]
    pub timeout_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            kind: FeedKind::default(),
            fixture_path: None,
            base_url: None,
            api_key: None,
            timeout_secs: default_feed_timeout(),
        }
    }
}

fn default_feed_timeout() -> u64 {
    30
}

// ============================================================================
// Scanner Settings
// ============================================================================

/// Scanner criteria and tuning knobs.
///
/// Every field is optional; the scanner crate fills gaps with its defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScannerSettings {
    /// Symbols to scan when no other universe source is given
    #[serde(default)]
    pub symbols: Option<Vec<String>>,

    // === Universe filter ===
    #[serde(default)]
    pub min_price: Option<f64>,
    #[serde(default)]
    pub max_price: Option<f64>,
    #[serde(default)]
    pub min_volume: Option<f64>,
    #[serde(default)]
    pub min_deviation_pct: Option<f64>,
    #[serde(default)]
    pub min_relative_volume: Option<f64>,
    #[serde(default)]
    pub min_atr_ratio: Option<f64>,
    /// Measure the gap against the pre-market range while the market is closed
    #[serde(default)]
    pub include_premarket: Option<bool>,

    // === Indicators ===
    #[serde(default)]
    pub atr_period: Option<usize>,
    #[serde(default)]
    pub rs_lookback_weeks: Option<usize>,
    /// "return" or "ema"
    #[serde(default)]
    pub rs_mode: Option<String>,

    // === Buckets ===
    #[serde(default)]
    pub volume_bucket_min: Option<f64>,
    #[serde(default)]
    pub atr_bucket_min_ratio: Option<f64>,

    // === Fetching ===
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    #[serde(default)]
    pub fetch_timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub requests_per_minute: Option<u32>,
}

/// Account risk settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskSettings {
    #[serde(default)]
    pub account_size: Option<f64>,
    #[serde(default)]
    pub max_daily_loss: Option<f64>,
    #[serde(default)]
    pub max_risk_per_trade: Option<f64>,
    #[serde(default)]
    pub stop_atr_multiple: Option<f64>,
    #[serde(default)]
    pub reward_risk_ratio: Option<f64>,
    /// Maximum share of the account a single position may use (%)
    #[serde(default)]
    pub max_position_pct: Option<f64>,
    #[serde(default)]
    pub max_consecutive_losses: Option<u32>,
    /// Number of top opportunities that receive a trade plan
    #[serde(default)]
    pub max_plans: Option<usize>,
}

// ============================================================================
// Schedule & Output
// ============================================================================

/// Cron schedule for repeated scans.
///
/// Expressions use the 6-field form with seconds (e.g., "0 15 9 * * 1-5").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_scan_cron")]
    pub cron: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cron: default_scan_cron(),
        }
    }
}

fn default_scan_cron() -> String {
    "0 15 9 * * 1-5".to_string() // 9:15 on weekdays, ahead of the open
}

/// Report output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Whether scheduled scans write report files
    #[serde(default)]
    pub save_reports: bool,

    #[serde(default = "default_report_dir")]
    pub report_dir: String,

    /// Report formats to generate ("markdown", "json")
    #[serde(default = "default_report_formats")]
    pub formats: Vec<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            save_reports: false,
            report_dir: default_report_dir(),
            formats: default_report_formats(),
        }
    }
}

fn default_report_dir() -> String {
    "~/.picker/reports".to_string()
}

fn default_report_formats() -> Vec<String> {
    vec!["markdown".to_string(), "json".to_string()]
}

// ============================================================================
// Tests
// ============================================================================

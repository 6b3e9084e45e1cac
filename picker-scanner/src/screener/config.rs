//! Scanner configuration.
//!
//! Maps the optional `scanner` section of the shared config onto concrete
//! settings with defaults.

use serde::{Deserialize, Serialize};
use tracing::warn;

use picker_common::config::Config;

use crate::indicators::{required_bars, RsMode, DEFAULT_ATR_PERIOD, DEFAULT_RS_LOOKBACK_WEEKS};

use super::filter::FilterCriteria;

// ============================================================================
// Scan Settings
// ============================================================================

/// Indicator, bucket and scoring parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSettings {
    #[serde(default = "default_atr_period")]
    pub atr_period: usize,

    #[serde(default = "default_rs_lookback_weeks")]
    pub rs_lookback_weeks: usize,

    #[serde(default)]
    pub rs_mode: RsMode,

    /// Minimum relative volume for the volume bucket
    #[serde(default = "default_volume_bucket_min")]
    pub volume_bucket_min: f64,

    /// Minimum ATR ratio for the ATR bucket
    #[serde(default = "default_atr_bucket_min_ratio")]
    pub atr_bucket_min_ratio: f64,

    /// |deviation| (%) that earns the full deviation score
    #[serde(default = "default_deviation_cap")]
    pub deviation_cap: f64,

    /// Relative volume that earns the full volume score
    #[serde(default = "default_volume_cap")]
    pub volume_cap: f64,

    /// ATR ratio that earns the full volatility half of the technical score
    #[serde(default = "default_atr_ratio_cap")]
    pub atr_ratio_cap: f64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            atr_period: default_atr_period(),
            rs_lookback_weeks: default_rs_lookback_weeks(),
            rs_mode: RsMode::default(),
            volume_bucket_min: default_volume_bucket_min(),
            atr_bucket_min_ratio: default_atr_bucket_min_ratio(),
            deviation_cap: default_deviation_cap(),
            volume_cap: default_volume_cap(),
            atr_ratio_cap: default_atr_ratio_cap(),
        }
    }
}

impl ScanSettings {
    /// Daily bars to request per symbol.
    pub fn bars_lookback(&self) -> usize {
        required_bars(self.atr_period, self.rs_lookback_weeks)
    }
}

fn default_atr_period() -> usize {
    DEFAULT_ATR_PERIOD
}

fn default_rs_lookback_weeks() -> usize {
    DEFAULT_RS_LOOKBACK_WEEKS
}

fn default_volume_bucket_min() -> f64 {
    1.5
}

fn default_atr_bucket_min_ratio() -> f64 {
    1.0
}

fn default_deviation_cap() -> f64 {
    10.0
}

fn default_volume_cap() -> f64 {
    4.0
}

fn default_atr_ratio_cap() -> f64 {
    3.0
}

// ============================================================================
// Fetch Settings
// ============================================================================

/// Concurrency, timeout and retry policy for the fetch phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchSettings {
    /// Symbols fetched concurrently
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Per-symbol timeout covering snapshot, bars and news
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Retries per request after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff for transient errors, doubled per attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Request budget; falls back to the feed's advertised limit
    #[serde(default)]
    pub requests_per_minute: Option<u32>,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            requests_per_minute: None,
        }
    }
}

fn default_max_concurrency() -> usize {
    8
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

/// Requests per minute when neither config nor feed set one.
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 600;

// ============================================================================
// Scan Config
// ============================================================================

/// Everything a scan session needs besides the feed and risk parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Configured universe (empty = ask the feed)
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub criteria: FilterCriteria,
    #[serde(default)]
    pub settings: ScanSettings,
    #[serde(default)]
    pub fetch: FetchSettings,
}

impl ScanConfig {
    /// Build from the shared config, filling gaps with defaults.
    pub fn from_config(config: &Config) -> Self {
        let Some(ref scanner) = config.scanner else {
            return Self::default();
        };

        let settings_default = ScanSettings::default();
        let fetch_default = FetchSettings::default();

        let rs_mode = match scanner.rs_mode.as_deref() {
            None => settings_default.rs_mode,
            Some(mode) => mode.parse().unwrap_or_else(|e| {
                warn!(error = %e, "Invalid rs_mode, using default");
                settings_default.rs_mode
            }),
        };

        Self {
            symbols: scanner.symbols.clone().unwrap_or_default(),
            criteria: FilterCriteria {
                min_price: scanner.min_price,
                max_price: scanner.max_price,
                min_volume: scanner.min_volume,
                min_deviation_pct: scanner.min_deviation_pct,
                min_relative_volume: scanner.min_relative_volume,
                min_atr_ratio: scanner.min_atr_ratio,
                include_premarket: scanner.include_premarket.unwrap_or(false),
            },
            settings: ScanSettings {
                atr_period: scanner.atr_period.unwrap_or(settings_default.atr_period),
                rs_lookback_weeks: scanner
                    .rs_lookback_weeks
                    .unwrap_or(settings_default.rs_lookback_weeks),
                rs_mode,
                volume_bucket_min: scanner
                    .volume_bucket_min
                    .unwrap_or(settings_default.volume_bucket_min),
                atr_bucket_min_ratio: scanner
                    .atr_bucket_min_ratio
                    .unwrap_or(settings_default.atr_bucket_min_ratio),
                ..settings_default
            },
            fetch: FetchSettings {
                max_concurrency: scanner
                    .max_concurrency
                    .unwrap_or(fetch_default.max_concurrency),
                fetch_timeout_secs: scanner
                    .fetch_timeout_secs
                    .unwrap_or(fetch_default.fetch_timeout_secs),
                max_retries: scanner.max_retries.unwrap_or(fetch_default.max_retries),
                requests_per_minute: scanner.requests_per_minute,
                ..fetch_default
            },
        }
    }
}

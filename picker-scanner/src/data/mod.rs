//! Market data module.
//!
//! Defines the bar/snapshot/news types the scanner consumes and the feeds
//! that produce them.
//!
//! # Feeds
//! - **StaticFeed**: in-memory map or JSON fixture file
//! - **HttpFeed**: generic REST JSON market data service
//!
//! All fetching goes through the token-bucket [`RateLimiter`]. Once a scan's
//! fetch phase completes, results are frozen into a [`MarketBatch`] that the
//! ranking stages borrow read-only.

mod http_feed;
mod provider;
mod rate_limiter;
mod static_feed;

pub use http_feed::HttpFeed;
pub use provider::{
    normalize_symbols, FeedCapabilities, FeedError, MarketDataFeed, StaticUniverse, UniverseSource,
};
pub use rate_limiter::{shared_limiter, RateLimiter, SharedRateLimiter};
pub use static_feed::{FeedFixture, FixtureEntry, StaticFeed};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ScanError;
use crate::result::ExcludedSymbol;

/// Number of prior sessions averaged for `avg_volume_20d`.
pub const AVG_VOLUME_WINDOW: usize = 20;

// ============================================================================
// Core Data Types
// ============================================================================

/// Bar resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    /// 1-minute bars
    M1,
    /// 5-minute bars
    M5,
    /// 15-minute bars
    M15,
    /// 30-minute bars
    M30,
    /// 1-hour bars
    H1,
    /// Daily bars
    Daily,
    /// Weekly bars
    Weekly,
}

impl Timeframe {
    /// Query string value sent to HTTP feeds.
    pub fn to_api_freq(&self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::Daily => "1d",
            Self::Weekly => "1w",
        }
    }

    /// Whether this is an intraday resolution.
    pub fn is_intraday(&self) -> bool {
        !matches!(self, Self::Daily | Self::Weekly)
    }
}

impl std::str::FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "1M" | "M1" => Ok(Self::M1),
            "5M" | "M5" => Ok(Self::M5),
            "15M" | "M15" => Ok(Self::M15),
            "30M" | "M30" => Ok(Self::M30),
            "1H" | "H1" | "60M" => Ok(Self::H1),
            "D" | "DAILY" | "1D" => Ok(Self::Daily),
            "W" | "WEEKLY" | "1W" => Ok(Self::Weekly),
            _ => Err(format!("Unknown timeframe: {}", s)),
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_api_freq())
    }
}

/// A single OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Bar open time
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Full range (high - low)
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// True range against the previous bar's close.
    pub fn true_range(&self, prev_close: f64) -> f64 {
        self.range()
            .max((self.high - prev_close).abs())
            .max((self.low - prev_close).abs())
    }
}

/// Bars for one symbol at one resolution, ascending by timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarSeries {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub bars: Vec<Bar>,
}

impl BarSeries {
    /// Build a series, sorting bars ascending by timestamp.
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe, mut bars: Vec<Bar>) -> Self {
        bars.sort_by_key(|b| b.timestamp);
        Self {
            symbol: symbol.into(),
            timeframe,
            bars,
        }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    /// Closing prices in order.
    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    /// Keep only the most recent `lookback` bars.
    pub fn tail(mut self, lookback: usize) -> Self {
        if self.bars.len() > lookback {
            let skip = self.bars.len() - lookback;
            self.bars.drain(..skip);
        }
        self
    }
}

/// Price move direction, taken from the sign of the deviation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// Zero deviation counts as up.
    pub fn from_deviation(deviation_pct: f64) -> Self {
        if deviation_pct >= 0.0 {
            Self::Up
        } else {
            Self::Down
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
        }
    }
}

/// Point-in-time view of a symbol for the current scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolSnapshot {
    #[serde(default)]
    pub symbol: String,
    pub current_price: f64,
    pub previous_close: f64,
    pub day_high: f64,
    pub day_low: f64,
    #[serde(default)]
    pub premarket_high: Option<f64>,
    #[serde(default)]
    pub premarket_low: Option<f64>,
    pub volume: f64,
    pub avg_volume_20d: f64,
    /// Whether the regular session is open
    #[serde(default)]
    pub market_open: bool,
}

impl SymbolSnapshot {
    /// Derive a snapshot from daily bars.
    ///
    /// The latest bar supplies price, range and volume; the average volume is
    /// taken over up to 20 bars preceding it.
    pub fn from_bars(symbol: &str, bars: &[Bar], market_open: bool) -> Result<Self, ScanError> {
        if bars.len() < 2 {
            return Err(ScanError::InsufficientData {
                needed: 2,
                available: bars.len(),
            });
        }

        let last = &bars[bars.len() - 1];
        let prior = &bars[..bars.len() - 1];
        let window = &prior[prior.len().saturating_sub(AVG_VOLUME_WINDOW)..];
        let avg_volume = window.iter().map(|b| b.volume).sum::<f64>() / window.len() as f64;

        Ok(Self {
            symbol: symbol.to_string(),
            current_price: last.close,
            previous_close: prior[prior.len() - 1].close,
            day_high: last.high,
            day_low: last.low,
            premarket_high: None,
            premarket_low: None,
            volume: last.volume,
            avg_volume_20d: avg_volume,
            market_open,
        })
    }

    /// Signed percent change from the previous close.
    pub fn deviation_pct(&self) -> f64 {
        (self.current_price - self.previous_close) / self.previous_close * 100.0
    }

    pub fn direction(&self) -> Direction {
        Direction::from_deviation(self.deviation_pct())
    }

    /// Signed percent move of the pre-market extreme farthest from the
    /// previous close; `None` without a usable pre-market range.
    pub fn premarket_deviation_pct(&self) -> Option<f64> {
        [self.premarket_high, self.premarket_low]
            .into_iter()
            .flatten()
            .filter(|p| p.is_finite() && *p > 0.0)
            .map(|p| (p - self.previous_close) / self.previous_close * 100.0)
            .filter(|d| d.is_finite())
            .max_by(|a, b| a.abs().partial_cmp(&b.abs()).unwrap_or(std::cmp::Ordering::Equal))
    }

    /// Deviation used for the gap check. Outside the regular session and
    /// with `include_premarket`, a larger pre-market move wins.
    pub fn gap_pct(&self, include_premarket: bool) -> f64 {
        let regular = self.deviation_pct();
        if !include_premarket || self.market_open {
            return regular;
        }
        match self.premarket_deviation_pct() {
            Some(pre) if pre.abs() > regular.abs() => pre,
            _ => regular,
        }
    }

    /// Today's volume over the 20-day average; `None` when the average is zero.
    pub fn relative_volume(&self) -> Option<f64> {
        if self.avg_volume_20d > 0.0 && self.avg_volume_20d.is_finite() {
            Some(self.volume / self.avg_volume_20d)
        } else {
            None
        }
    }

    /// Reject snapshots the ranking stages cannot trust.
    pub fn validate(&self) -> Result<(), ScanError> {
        let bad = |reason: String| ScanError::DataUnavailable {
            symbol: self.symbol.clone(),
            reason,
        };

        let prices = [
            ("current_price", self.current_price),
            ("previous_close", self.previous_close),
            ("day_high", self.day_high),
            ("day_low", self.day_low),
        ];
        for (field, value) in prices {
            if !value.is_finite() || value <= 0.0 {
                return Err(bad(format!("{} must be a positive number, got {}", field, value)));
            }
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(bad(format!("volume must not be negative, got {}", self.volume)));
        }
        if !self.avg_volume_20d.is_finite() || self.avg_volume_20d < 0.0 {
            return Err(bad(format!(
                "avg_volume_20d must not be negative, got {}",
                self.avg_volume_20d
            )));
        }

        if self.market_open
            && !(self.day_low <= self.current_price && self.current_price <= self.day_high)
        {
            return Err(bad(format!(
                "price {} outside day range [{}, {}]",
                self.current_price, self.day_low, self.day_high
            )));
        }

        Ok(())
    }
}

/// A news headline for a symbol.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Feed-provided category (e.g., "earnings")
    #[serde(default)]
    pub category: Option<String>,
}

impl NewsItem {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }
}

// ============================================================================
// Market Batch
// ============================================================================

/// Everything fetched for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolData {
    pub snapshot: SymbolSnapshot,
    pub bars: BarSeries,
    pub news: Vec<NewsItem>,
}

/// Frozen fetch results for one scan, keyed by symbol.
///
/// Ordering is by symbol, independent of fetch completion order.
#[derive(Debug, Clone, Default)]
pub struct MarketBatch {
    /// Number of symbols the universe contained
    pub universe_size: usize,
    pub symbols: BTreeMap<String, SymbolData>,
    /// Symbols dropped during fetching
    pub excluded: Vec<ExcludedSymbol>,
}

impl MarketBatch {
    pub fn new(universe_size: usize) -> Self {
        Self {
            universe_size,
            ..Default::default()
        }
    }

    pub fn insert(&mut self, data: SymbolData) {
        self.symbols.insert(data.snapshot.symbol.clone(), data);
    }

    pub fn get(&self, symbol: &str) -> Option<&SymbolData> {
        self.symbols.get(symbol)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================

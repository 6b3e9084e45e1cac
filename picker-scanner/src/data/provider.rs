//! Market data feed abstraction.
//!
//! Defines the `MarketDataFeed` trait every data source implements and the
//! `UniverseSource` trait that supplies the symbols to scan.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::retry_suffix;

use super::{BarSeries, NewsItem, SymbolSnapshot, Timeframe};

// ============================================================================
// Feed Capabilities
// ============================================================================

/// Capabilities advertised by a feed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedCapabilities {
    /// Supported bar resolutions
    pub timeframes: Vec<Timeframe>,
    /// Whether news items are available
    pub news: bool,
    /// Maximum bars returned per request
    pub max_lookback: Option<usize>,
    /// Rate limit (requests per minute)
    pub rate_limit_rpm: Option<u32>,
}

impl FeedCapabilities {
    /// Check if a timeframe is supported
    pub fn supports_timeframe(&self, tf: Timeframe) -> bool {
        self.timeframes.contains(&tf)
    }

    /// Daily and weekly bars plus news
    pub fn daily_only() -> Self {
        Self {
            timeframes: vec![Timeframe::Daily, Timeframe::Weekly],
            news: true,
            ..Default::default()
        }
    }

    /// Every resolution plus news
    pub fn full() -> Self {
        Self {
            timeframes: vec![
                Timeframe::M1,
                Timeframe::M5,
                Timeframe::M15,
                Timeframe::M30,
                Timeframe::H1,
                Timeframe::Daily,
                Timeframe::Weekly,
            ],
            news: true,
            max_lookback: None,
            rate_limit_rpm: None,
        }
    }
}

// ============================================================================
// Feed Error
// ============================================================================

/// Errors returned by market data feeds.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FeedError {
    /// Symbol or resource does not exist upstream
    #[error("Not found: {0}")]
    NotFound(String),

    /// Connection failed or the server returned an error
    #[error("Network error: {0}")]
    Network(String),

    /// Rate limit exceeded
    #[error("Rate limited{}", retry_suffix(.retry_after_secs))]
    RateLimited { retry_after_secs: Option<u64> },

    /// Request did not complete in time
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Response body could not be decoded
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl FeedError {
    /// Check if the error is worth retrying
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::RateLimited { .. } | Self::Timeout(_)
        )
    }

    /// Check if the error points at the connection rather than the symbol
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }
}

// ============================================================================
// Feed Traits
// ============================================================================

/// Trait for market data feeds.
#[async_trait]
pub trait MarketDataFeed: Send + Sync {
    /// Feed name for logging (e.g., "static", "http")
    fn name(&self) -> &str;

    /// Capabilities of this feed
    fn capabilities(&self) -> FeedCapabilities {
        FeedCapabilities::daily_only()
    }

    /// Lightweight reachability check run before every scan.
    async fn health_check(&self) -> Result<(), FeedError>;

    /// Fetch up to `lookback` most recent bars for a symbol.
    async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        lookback: usize,
    ) -> Result<BarSeries, FeedError>;

    /// Fetch the current snapshot for a symbol.
    async fn fetch_snapshot(&self, symbol: &str) -> Result<SymbolSnapshot, FeedError>;

    /// Fetch recent news for a symbol.
    async fn fetch_news(&self, symbol: &str) -> Result<Vec<NewsItem>, FeedError>;
}

/// Source of the symbols to scan.
#[async_trait]
pub trait UniverseSource: Send + Sync {
    async fn load(&self) -> Result<Vec<String>, FeedError>;
}

/// Normalize symbols: trim, uppercase, drop blanks and duplicates (first wins).
pub fn normalize_symbols<I, S>(symbols: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = std::collections::HashSet::new();
    symbols
        .into_iter()
        .map(|s| s.as_ref().trim().to_uppercase())
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}

/// A fixed list of symbols.
#[derive(Debug, Clone, Default)]
pub struct StaticUniverse {
    symbols: Vec<String>,
}

impl StaticUniverse {
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            symbols: normalize_symbols(symbols),
        }
    }

    /// Parse a comma separated list (e.g., "AAPL,MSFT, nvda").
    pub fn parse(list: &str) -> Self {
        Self::new(list.split(','))
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }
}

#[async_trait]
impl UniverseSource for StaticUniverse {
    async fn load(&self) -> Result<Vec<String>, FeedError> {
        Ok(self.symbols.clone())
    }
}

// ============================================================================
// Tests
// ============================================================================

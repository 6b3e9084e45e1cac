//! In-memory feed backed by a map or a JSON fixture file.
//!
//! Fixture layout:
//!
//! ```json
//! {
//!   "universe": ["AAA", "BBB"],
//!   "symbols": {
//!     "AAA": {
//!       "snapshot": { "current_price": 20.0, "previous_close": 18.0, ... },
//!       "bars": [{ "timestamp": "2024-03-01T00:00:00Z", "open": 18.0, ... }],
//!       "news": [{ "title": "AAA beats earnings estimates" }]
//!     }
//!   }
//! }
//! ```
//!
//! When `snapshot` is omitted it is derived from the bars.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use super::provider::{normalize_symbols, FeedCapabilities, FeedError, MarketDataFeed, UniverseSource};
use super::{Bar, BarSeries, NewsItem, SymbolSnapshot, Timeframe};

/// Fixture data for one symbol.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureEntry {
    #[serde(default)]
    pub snapshot: Option<SymbolSnapshot>,
    /// Daily bars
    #[serde(default)]
    pub bars: Vec<Bar>,
    #[serde(default)]
    pub news: Vec<NewsItem>,
}

/// A complete fixture file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedFixture {
    /// Explicit universe; defaults to every symbol in `symbols`
    #[serde(default)]
    pub universe: Vec<String>,
    #[serde(default)]
    pub symbols: BTreeMap<String, FixtureEntry>,
}

impl FeedFixture {
    /// Load a fixture from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse fixture from {}", path.display()))
    }
}

/// Feed serving data from memory.
pub struct StaticFeed {
    name: String,
    universe: Vec<String>,
    entries: BTreeMap<String, FixtureEntry>,
    healthy: AtomicBool,
}

impl StaticFeed {
    /// Create an empty feed.
    pub fn new() -> Self {
        Self::from_fixture(FeedFixture::default())
    }

    /// Create a feed from fixture data.
    pub fn from_fixture(fixture: FeedFixture) -> Self {
        let entries: BTreeMap<String, FixtureEntry> = fixture
            .symbols
            .into_iter()
            .map(|(symbol, mut entry)| {
                let symbol = symbol.trim().to_uppercase();
                if let Some(ref mut snapshot) = entry.snapshot {
                    snapshot.symbol = symbol.clone();
                }
                (symbol, entry)
            })
            .collect();

        Self {
            name: "static".to_string(),
            universe: normalize_symbols(&fixture.universe),
            entries,
            healthy: AtomicBool::new(true),
        }
    }

    /// Load a feed from a JSON fixture file.
    pub fn load(path: &Path) -> Result<Self> {
        let fixture = FeedFixture::load(path)?;
        debug!(
            path = %path.display(),
            symbols = fixture.symbols.len(),
            "Loaded feed fixture"
        );
        Ok(Self::from_fixture(fixture))
    }

    /// Add or replace one symbol.
    pub fn with_symbol(mut self, symbol: &str, mut entry: FixtureEntry) -> Self {
        let symbol = symbol.trim().to_uppercase();
        if let Some(ref mut snapshot) = entry.snapshot {
            snapshot.symbol = symbol.clone();
        }
        self.entries.insert(symbol, entry);
        self
    }

    /// Toggle reachability, simulating an outage.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }

    fn entry(&self, symbol: &str) -> Result<&FixtureEntry, FeedError> {
        if !self.healthy.load(Ordering::Relaxed) {
            return Err(FeedError::Network("static feed offline".into()));
        }
        self.entries
            .get(symbol)
            .ok_or_else(|| FeedError::NotFound(symbol.to_string()))
    }
}

impl Default for StaticFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataFeed for StaticFeed {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> FeedCapabilities {
        FeedCapabilities {
            timeframes: vec![Timeframe::Daily],
            news: true,
            max_lookback: None,
            rate_limit_rpm: None,
        }
    }

    async fn health_check(&self) -> Result<(), FeedError> {
        if self.healthy.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(FeedError::Network("static feed offline".into()))
        }
    }

    async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        lookback: usize,
    ) -> Result<BarSeries, FeedError> {
        let entry = self.entry(symbol)?;
        if timeframe != Timeframe::Daily {
            return Err(FeedError::NotFound(format!("{} {} bars", symbol, timeframe)));
        }

        Ok(BarSeries::new(symbol, timeframe, entry.bars.clone()).tail(lookback))
    }

    async fn fetch_snapshot(&self, symbol: &str) -> Result<SymbolSnapshot, FeedError> {
        let entry = self.entry(symbol)?;
        match entry.snapshot {
            Some(ref snapshot) => Ok(snapshot.clone()),
            None => {
                let series = BarSeries::new(symbol, Timeframe::Daily, entry.bars.clone());
                SymbolSnapshot::from_bars(symbol, &series.bars, false)
                    .map_err(|e| FeedError::InvalidResponse(e.to_string()))
            }
        }
    }

    async fn fetch_news(&self, symbol: &str) -> Result<Vec<NewsItem>, FeedError> {
        Ok(self.entry(symbol)?.news.clone())
    }
}

#[async_trait]
impl UniverseSource for StaticFeed {
    async fn load(&self) -> Result<Vec<String>, FeedError> {
        if !self.healthy.load(Ordering::Relaxed) {
            return Err(FeedError::Network("static feed offline".into()));
        }
        if self.universe.is_empty() {
            Ok(self.entries.keys().cloned().collect())
        } else {
            Ok(self.universe.clone())
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use std::io::Write;

    fn bars(count: usize) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..count)
            .map(|i| Bar {
                timestamp: start + Duration::days(i as i64),
                open: 10.0 + i as f64,
                high: 11.0 + i as f64,
                low: 9.0 + i as f64,
                close: 10.0 + i as f64,
                volume: 1000.0,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_fetch_bars_tail() {
        let feed = StaticFeed::new().with_symbol(
            "aaa",
            FixtureEntry {
                bars: bars(30),
                ..Default::default()
            },
        );

        let series = feed.fetch_bars("AAA", Timeframe::Daily, 10).await.unwrap();
        assert_eq!(series.len(), 10);
        assert!((series.last().unwrap().close - 39.0).abs() < 0.001);

        assert!(matches!(
            feed.fetch_bars("AAA", Timeframe::H1, 10).await,
            Err(FeedError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_derived_from_bars() {
        let feed = StaticFeed::new().with_symbol(
            "AAA",
            FixtureEntry {
                bars: bars(5),
                ..Default::default()
            },
        );

        let snap = feed.fetch_snapshot("AAA").await.unwrap();
        assert_eq!(snap.symbol, "AAA");
        assert!((snap.current_price - 14.0).abs() < 0.001);
        assert!((snap.previous_close - 13.0).abs() < 0.001);
    }

    #[tokio::test]
    async fn test_unknown_symbol_not_found() {
        let feed = StaticFeed::new();
        assert!(matches!(
            feed.fetch_snapshot("ZZZ").await,
            Err(FeedError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_offline_feed() {
        let feed = StaticFeed::new().with_symbol("AAA", FixtureEntry::default());
        feed.set_healthy(false);

        assert!(feed.health_check().await.is_err());
        assert!(matches!(
            feed.fetch_news("AAA").await,
            Err(FeedError::Network(_))
        ));
        assert!(UniverseSource::load(&feed).await.is_err());
    }

    #[tokio::test]
    async fn test_load_fixture_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "universe": ["bbb", "aaa"],
                "symbols": {{
                    "AAA": {{
                        "snapshot": {{
                            "current_price": 20.0, "previous_close": 18.0,
                            "day_high": 20.5, "day_low": 18.5,
                            "volume": 2000000, "avg_volume_20d": 500000
                        }},
                        "news": [{{ "title": "AAA beats estimates" }}]
                    }}
                }}
            }}"#
        )
        .unwrap();

        let feed = StaticFeed::load(file.path()).unwrap();
        assert_eq!(UniverseSource::load(&feed).await.unwrap(), vec!["BBB", "AAA"]);

        let snap = feed.fetch_snapshot("AAA").await.unwrap();
        assert_eq!(snap.symbol, "AAA");
        assert_eq!(feed.fetch_news("AAA").await.unwrap().len(), 1);
    }
}

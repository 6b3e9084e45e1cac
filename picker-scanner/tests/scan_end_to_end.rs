//! End-to-end scans through `ScanSession`.
//!
//! Covers the full pipeline from feed to published `ScanResult`: filtering,
//! buckets, plans, scan-level failures, retries and cancellation.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use picker_scanner::data::{
    Bar, BarSeries, Direction, FeedError, FixtureEntry, MarketDataFeed, NewsItem, StaticFeed,
    StaticUniverse, SymbolSnapshot, Timeframe,
};
use picker_scanner::error::ScanError;
use picker_scanner::plan::{RiskConfig, TradeOutcome, TradeSide};
use picker_scanner::screener::{FilterCriteria, ScanConfig};
use picker_scanner::session::{ScanCanceller, ScanSession};

// ============================================================================
// Fixtures
// ============================================================================

/// 70 daily bars with a constant close and a fixed high-low range.
fn flat_bars(close: f64, range: f64) -> Vec<Bar> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    (0..70)
        .map(|i| Bar {
            timestamp: start + chrono::Duration::days(i),
            open: close,
            high: close + range / 2.0,
            low: close - range / 2.0,
            close,
            volume: 500_000.0,
        })
        .collect()
}

fn snapshot(price: f64, prev: f64, volume: f64, avg: f64) -> SymbolSnapshot {
    SymbolSnapshot {
        symbol: String::new(),
        current_price: price,
        previous_close: prev,
        day_high: price.max(prev) + 0.5,
        day_low: price.min(prev) - 0.5,
        premarket_high: None,
        premarket_low: None,
        volume,
        avg_volume_20d: avg,
        market_open: false,
    }
}

fn entry(price: f64, prev: f64, volume: f64, avg: f64, news: &[&str]) -> FixtureEntry {
    FixtureEntry {
        snapshot: Some(snapshot(price, prev, volume, avg)),
        bars: flat_bars(price, price * 0.03),
        news: news.iter().map(|title| NewsItem::new(*title)).collect(),
    }
}

/// AAA: price 20, prev close 18, 4x relative volume, ATR 0.6 (3%).
fn aaa() -> FixtureEntry {
    entry(20.0, 18.0, 2_000_000.0, 500_000.0, &[])
}

fn aaa_criteria() -> FilterCriteria {
    FilterCriteria {
        min_price: Some(5.0),
        max_price: Some(100.0),
        min_volume: Some(500_000.0),
        min_deviation_pct: Some(4.0),
        ..Default::default()
    }
}

fn fast_config() -> ScanConfig {
    let mut config = ScanConfig::default();
    config.fetch.retry_backoff_ms = 1;
    config.fetch.requests_per_minute = Some(60_000);
    config
}

fn session_for(feed: StaticFeed) -> (Arc<StaticFeed>, ScanSession) {
    let feed = Arc::new(feed);
    let session = ScanSession::new(feed.clone(), fast_config());
    (feed, session)
}

// ============================================================================
// Mock Feed
// ============================================================================

/// Feed that fails snapshot requests a set number of times before serving AAA.
struct FlakyFeed {
    error: FeedError,
    failures_remaining: AtomicU32,
    snapshot_calls: AtomicU32,
    delay: Duration,
}

impl FlakyFeed {
    fn new(error: FeedError, failures: u32) -> Self {
        Self {
            error,
            failures_remaining: AtomicU32::new(failures),
            snapshot_calls: AtomicU32::new(0),
            delay: Duration::ZERO,
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new(FeedError::Network("unused".into()), 0)
        }
    }

    fn snapshot_calls(&self) -> u32 {
        self.snapshot_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MarketDataFeed for FlakyFeed {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn health_check(&self) -> Result<(), FeedError> {
        Ok(())
    }

    async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        lookback: usize,
    ) -> Result<BarSeries, FeedError> {
        Ok(BarSeries::new(symbol, timeframe, flat_bars(20.0, 0.6)).tail(lookback))
    }

    async fn fetch_snapshot(&self, symbol: &str) -> Result<SymbolSnapshot, FeedError> {
        self.snapshot_calls.fetch_add(1, Ordering::Relaxed);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let remaining = self.failures_remaining.load(Ordering::Relaxed);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::Relaxed);
            return Err(self.error.clone());
        }

        let mut snap = snapshot(20.0, 18.0, 2_000_000.0, 500_000.0);
        snap.symbol = symbol.to_string();
        Ok(snap)
    }

    async fn fetch_news(&self, _symbol: &str) -> Result<Vec<NewsItem>, FeedError> {
        Err(FeedError::NotFound("news".into()))
    }
}

/// Feed that labels every snapshot and series with the same wrong symbol.
struct MislabelledFeed;

#[async_trait]
impl MarketDataFeed for MislabelledFeed {
    fn name(&self) -> &str {
        "mislabelled"
    }

    async fn health_check(&self) -> Result<(), FeedError> {
        Ok(())
    }

    async fn fetch_bars(
        &self,
        _symbol: &str,
        timeframe: Timeframe,
        lookback: usize,
    ) -> Result<BarSeries, FeedError> {
        Ok(BarSeries::new("WRONG", timeframe, flat_bars(20.0, 0.6)).tail(lookback))
    }

    async fn fetch_snapshot(&self, _symbol: &str) -> Result<SymbolSnapshot, FeedError> {
        Ok(snapshot(20.0, 18.0, 2_000_000.0, 500_000.0))
    }

    async fn fetch_news(&self, _symbol: &str) -> Result<Vec<NewsItem>, FeedError> {
        Ok(Vec::new())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_aaa_end_to_end() {
    let (feed, session) = session_for(StaticFeed::new().with_symbol("AAA", aaa()));

    let result = session
        .run_scan(&*feed, &aaa_criteria(), &RiskConfig::default())
        .await
        .unwrap();

    assert_eq!(result.universe_size, 1);
    assert_eq!(result.candidates, 1);
    assert!(result.deviation_results.iter().any(|e| e.symbol == "AAA"));
    assert!(result.volume_results.iter().any(|e| e.symbol == "AAA"));

    let opp = result.opportunity("AAA").unwrap();
    assert_eq!(opp.direction, Direction::Up);
    assert!((opp.deviation_pct - 11.111).abs() < 0.01);
    assert!((opp.relative_volume.unwrap() - 4.0).abs() < 0.001);
    assert!((opp.atr_pct.unwrap() - 3.0).abs() < 0.001);
    assert!(opp.score > 0.0 && opp.score <= 100.0);

    let plan = opp.trade_plan.as_ref().unwrap();
    assert_eq!(plan.side, TradeSide::Long);
    assert!((plan.entry_price - 20.0).abs() < 0.001);
    assert!((plan.stop_loss - 19.1).abs() < 0.001);
    assert!((plan.take_profit - 21.8).abs() < 0.001);
    assert!((plan.risk_reward_ratio - 2.0).abs() < 0.001);
    assert_eq!(plan.position_size, 55);
}

#[tokio::test]
async fn test_zero_average_volume_skips_volume_bucket() {
    let feed = StaticFeed::new()
        .with_symbol("AAA", aaa())
        .with_symbol("ZERO", entry(30.0, 27.0, 800_000.0, 0.0, &[]));
    let (feed, session) = session_for(feed);

    let result = session
        .run_scan(&*feed, &aaa_criteria(), &RiskConfig::default())
        .await
        .unwrap();

    assert!(result.deviation_results.iter().any(|e| e.symbol == "ZERO"));
    assert!(result.volume_results.iter().all(|e| e.symbol != "ZERO"));

    let zero = result.opportunity("ZERO").unwrap();
    assert!(zero.relative_volume.is_none());
    assert!(zero.score.is_finite());
    assert!(result.excluded.iter().all(|e| e.symbol != "ZERO"));
}

#[tokio::test]
async fn test_unreachable_feed_fails_scan() {
    let (feed, session) = session_for(StaticFeed::new().with_symbol("AAA", aaa()));
    feed.set_healthy(false);

    let err = session
        .run_scan(&*feed, &aaa_criteria(), &RiskConfig::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ScanError::FeedUnavailable(ref reason) if reason.starts_with("feed unreachable")));
    assert!(err.is_scan_level());
    assert!(session.store().latest().await.is_none());
}

#[tokio::test]
async fn test_every_fetch_failing_fails_scan() {
    let feed = Arc::new(FlakyFeed::new(FeedError::Network("reset".into()), u32::MAX));
    let mut config = fast_config();
    config.fetch.max_retries = 1;
    let session = ScanSession::new(feed.clone(), config);

    let universe = StaticUniverse::new(["AAA", "BBB"]);
    let err = session
        .run_scan(&universe, &FilterCriteria::default(), &RiskConfig::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ScanError::FeedUnavailable(_)));
    // One retry per symbol
    assert_eq!(feed.snapshot_calls(), 4);
}

#[tokio::test]
async fn test_missing_symbol_excluded() {
    let (_feed, session) = session_for(StaticFeed::new().with_symbol("AAA", aaa()));
    let universe = StaticUniverse::parse("aaa, missing");

    let result = session
        .run_scan(&universe, &aaa_criteria(), &RiskConfig::default())
        .await
        .unwrap();

    assert_eq!(result.universe_size, 2);
    assert!(result.opportunity("AAA").is_some());

    let missing = result.excluded.iter().find(|e| e.symbol == "MISSING").unwrap();
    assert_eq!(missing.stage, "fetch");
}

#[tokio::test]
async fn test_merger_never_an_opportunity() {
    let feed = StaticFeed::new()
        .with_symbol("AAA", aaa())
        .with_symbol(
            "BBB",
            entry(
                40.0,
                30.0,
                5_000_000.0,
                500_000.0,
                &["BBB agrees to acquisition by Megacorp"],
            ),
        );
    let (feed, session) = session_for(feed);

    let result = session
        .run_scan(&*feed, &aaa_criteria(), &RiskConfig::default())
        .await
        .unwrap();

    assert!(result.opportunity("BBB").is_none());
    assert!(result.catalyst_results.iter().any(|e| e.symbol == "BBB"));
    assert!(result.deviation_results.iter().any(|e| e.symbol == "BBB"));
    assert_eq!(result.opportunities.len(), 1);
}

#[tokio::test]
async fn test_opportunities_strictly_ordered() {
    let feed = StaticFeed::new()
        .with_symbol("AAA", aaa())
        .with_symbol("BBB", aaa())
        .with_symbol("CCC", entry(15.0, 14.0, 700_000.0, 600_000.0, &[]))
        .with_symbol("DDD", entry(50.0, 60.0, 3_000_000.0, 1_000_000.0, &[]));
    let (feed, session) = session_for(feed);

    let result = session
        .run_scan(&*feed, &FilterCriteria::default(), &RiskConfig::default())
        .await
        .unwrap();

    assert_eq!(result.opportunities.len(), 4);
    for pair in result.opportunities.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        assert!(a.score > b.score || (a.score == b.score && a.symbol < b.symbol));
    }

    // Identical inputs tie on score and fall back to symbol order
    let aaa = result.opportunities.iter().position(|o| o.symbol == "AAA").unwrap();
    let bbb = result.opportunities.iter().position(|o| o.symbol == "BBB").unwrap();
    assert_eq!(bbb, aaa + 1);

    let ddd = result.opportunity("DDD").unwrap();
    assert_eq!(ddd.direction, Direction::Down);
    assert_eq!(ddd.trade_plan.as_ref().unwrap().side, TradeSide::Short);
}

#[tokio::test]
async fn test_rate_limited_request_retried() {
    let feed = Arc::new(FlakyFeed::new(
        FeedError::RateLimited {
            retry_after_secs: Some(0),
        },
        2,
    ));
    let session = ScanSession::new(feed.clone(), fast_config());

    let result = session
        .run_scan(
            &StaticUniverse::new(["AAA"]),
            &aaa_criteria(),
            &RiskConfig::default(),
        )
        .await
        .unwrap();

    assert_eq!(feed.snapshot_calls(), 3);
    assert!(result.opportunity("AAA").is_some());
    assert!(result.excluded.is_empty());
}

#[tokio::test]
async fn test_retry_after_longer_than_fetch_timeout() {
    let feed = Arc::new(FlakyFeed::new(
        FeedError::RateLimited {
            retry_after_secs: Some(2),
        },
        1,
    ));
    let mut config = fast_config();
    config.fetch.fetch_timeout_secs = 1;
    let session = ScanSession::new(feed.clone(), config);

    let result = session
        .run_scan(
            &StaticUniverse::new(["AAA"]),
            &aaa_criteria(),
            &RiskConfig::default(),
        )
        .await
        .unwrap();

    assert_eq!(feed.snapshot_calls(), 2);
    assert!(result.opportunity("AAA").is_some());
    assert!(result.excluded.is_empty());
}

#[tokio::test]
async fn test_batch_keyed_by_requested_symbol() {
    let session = ScanSession::new(Arc::new(MislabelledFeed), fast_config());

    let result = session
        .run_scan(
            &StaticUniverse::new(["AAA", "BBB"]),
            &FilterCriteria::default(),
            &RiskConfig::default(),
        )
        .await
        .unwrap();

    let symbols: Vec<_> = result
        .opportunities
        .iter()
        .map(|o| o.symbol.as_str())
        .collect();
    assert_eq!(symbols, vec!["AAA", "BBB"]);
    assert!(result.excluded.is_empty());
}

#[tokio::test]
async fn test_retries_exhausted_drops_symbol() {
    let feed = Arc::new(FlakyFeed::new(
        FeedError::Timeout("slow upstream".into()),
        5,
    ));
    let mut config = fast_config();
    config.fetch.max_retries = 2;
    let session = ScanSession::new(feed.clone(), config);

    // Five failures over two symbols with three attempts each: one symbol
    // fails every attempt, the other succeeds on its last try.
    let universe = StaticUniverse::new(["AAA", "BBB"]);
    let result = session
        .run_scan(&universe, &FilterCriteria::default(), &RiskConfig::default())
        .await
        .unwrap();

    assert_eq!(result.excluded.len(), 1);
    assert_eq!(result.excluded[0].stage, "fetch");
    assert_eq!(result.opportunities.len(), 1);
    assert_eq!(feed.snapshot_calls(), 6);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let (feed, session) = session_for(StaticFeed::new().with_symbol("AAA", aaa()));
    let canceller = ScanCanceller::new();
    canceller.cancel();

    let err = session
        .run_scan_cancellable(
            &*feed,
            &aaa_criteria(),
            &RiskConfig::default(),
            &canceller,
        )
        .await
        .unwrap_err();

    assert_eq!(err, ScanError::ScanAborted);
    assert!(session.store().latest().await.is_none());
}

#[tokio::test]
async fn test_cancelled_mid_fetch_publishes_nothing() {
    let feed = Arc::new(FlakyFeed::slow(Duration::from_secs(5)));
    let session = ScanSession::new(feed.clone(), fast_config());
    let canceller = ScanCanceller::new();

    let trigger = canceller.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let err = session
        .run_scan_cancellable(
            &StaticUniverse::new(["AAA", "BBB"]),
            &FilterCriteria::default(),
            &RiskConfig::default(),
            &canceller,
        )
        .await
        .unwrap_err();

    assert_eq!(err, ScanError::ScanAborted);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(session.store().version().await, 0);
}

#[tokio::test]
async fn test_snapshot_replaced_per_scan() {
    let (feed, session) = session_for(StaticFeed::new().with_symbol("AAA", aaa()));
    let risk = RiskConfig::default();

    let first = session
        .run_scan(&*feed, &aaa_criteria(), &risk)
        .await
        .unwrap();
    let second = session
        .run_scan(&*feed, &aaa_criteria(), &risk)
        .await
        .unwrap();

    assert_eq!(first.version, 1);
    assert_eq!(second.version, 2);
    assert_ne!(first.scan_id, second.scan_id);

    let latest = session.store().latest().await.unwrap();
    assert_eq!(latest.scan_id, second.scan_id);
    // Readers holding the first snapshot still see it unchanged
    assert_eq!(first.opportunities, second.opportunities);
}

#[tokio::test]
async fn test_risk_guard_withholds_plans() {
    let (feed, session) = session_for(StaticFeed::new().with_symbol("AAA", aaa()));
    session
        .guard()
        .write()
        .await
        .record_trade("XYZ", TradeOutcome::Loss, -150.0);

    let result = session
        .run_scan(&*feed, &aaa_criteria(), &RiskConfig::default())
        .await
        .unwrap();

    assert!(result.plans_blocked);
    let opp = result.opportunity("AAA").unwrap();
    assert!(opp.trade_plan.is_none());
}

#[tokio::test]
async fn test_risk_guard_uses_scan_limits() {
    let (feed, session) = session_for(StaticFeed::new().with_symbol("AAA", aaa()));
    session
        .guard()
        .write()
        .await
        .record_trade("XYZ", TradeOutcome::Loss, -150.0);

    let relaxed = RiskConfig {
        max_daily_loss: 1000.0,
        ..Default::default()
    };
    let result = session
        .run_scan(&*feed, &aaa_criteria(), &relaxed)
        .await
        .unwrap();
    assert!(!result.plans_blocked);
    assert!(result.opportunity("AAA").unwrap().trade_plan.is_some());

    // One loss is enough once the streak limit is 1
    let strict = RiskConfig {
        max_daily_loss: 1000.0,
        max_consecutive_losses: 1,
        ..Default::default()
    };
    let result = session
        .run_scan(&*feed, &aaa_criteria(), &strict)
        .await
        .unwrap();
    assert!(result.plans_blocked);
}

#[tokio::test]
async fn test_invalid_risk_config_rejected() {
    let (feed, session) = session_for(StaticFeed::new().with_symbol("AAA", aaa()));
    let risk = RiskConfig {
        account_size: -1.0,
        ..Default::default()
    };

    let err = session
        .run_scan(&*feed, &aaa_criteria(), &risk)
        .await
        .unwrap_err();

    assert!(matches!(err, ScanError::InvalidConfig(_)));
}

#[tokio::test]
async fn test_zero_atr_plan_excluded() {
    let mut flat = entry(25.0, 22.0, 2_000_000.0, 500_000.0, &[]);
    flat.bars = flat_bars(25.0, 0.0);
    let feed = StaticFeed::new().with_symbol("AAA", aaa()).with_symbol("FLAT", flat);
    let (feed, session) = session_for(feed);

    let result = session
        .run_scan(&*feed, &aaa_criteria(), &RiskConfig::default())
        .await
        .unwrap();

    let flat = result.opportunity("FLAT").unwrap();
    assert!(flat.trade_plan.is_none());
    assert!(result
        .excluded
        .iter()
        .any(|e| e.symbol == "FLAT" && e.stage == "plan"));
    assert!(result.opportunity("AAA").unwrap().trade_plan.is_some());
}

#[tokio::test]
async fn test_demo_fixture_scan() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../demos/sample_fixture.json");
    let feed = Arc::new(StaticFeed::load(&path).unwrap());
    let session = ScanSession::new(feed.clone(), fast_config());
    let criteria = FilterCriteria {
        min_price: Some(5.0),
        ..Default::default()
    };

    let result = session
        .run_scan(&*feed, &criteria, &RiskConfig::default())
        .await
        .unwrap();

    assert_eq!(result.universe_size, 4);
    assert_eq!(result.candidates, 3);
    assert!(result.opportunity("AAA").is_some());
    assert!(result.opportunity("CCC").is_none());
    assert!(result.catalyst_results.iter().any(|e| e.symbol == "CCC"));
}

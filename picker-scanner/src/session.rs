//! Scan session controller.
//!
//! Sequences one scan end to end:
//! 1. Validate risk config, check feed health, load the universe
//! 2. Fetch snapshot + daily bars + news per symbol through a bounded pool
//! 3. Freeze the fetch results into a [`MarketBatch`]
//! 4. Rank, then build plans for the top opportunities
//! 5. Publish the [`ScanResult`] into the [`SnapshotStore`]
//!
//! A cancelled or failed scan publishes nothing; readers keep seeing the
//! previous result.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use crate::catalyst::CatalystClassifier;
use crate::data::{
    normalize_symbols, shared_limiter, FeedError, MarketBatch, MarketDataFeed, SharedRateLimiter,
    SymbolData, Timeframe, UniverseSource,
};
use crate::error::ScanError;
use crate::plan::{build_plan, RiskConfig, RiskGuard, TradeSide};
use crate::result::{ExcludedSymbol, ScanOutcome, ScanResult};
use crate::screener::{FilterCriteria, ScanConfig, ScannerRanker, DEFAULT_REQUESTS_PER_MINUTE};

// ============================================================================
// Snapshot Store
// ============================================================================

#[derive(Debug, Default)]
struct StoreInner {
    current: Option<Arc<ScanResult>>,
    version: u64,
}

/// Latest published scan result, replaced atomically.
#[derive(Debug, Clone, Default)]
pub struct SnapshotStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a result, assigning it the next version.
    pub async fn publish(&self, mut result: ScanResult) -> Arc<ScanResult> {
        let mut inner = self.inner.write().await;
        inner.version += 1;
        result.version = inner.version;

        let result = Arc::new(result);
        inner.current = Some(Arc::clone(&result));
        result
    }

    /// The most recently published result.
    pub async fn latest(&self) -> Option<Arc<ScanResult>> {
        self.inner.read().await.current.clone()
    }

    /// Version of the latest result (0 before the first publish).
    pub async fn version(&self) -> u64 {
        self.inner.read().await.version
    }
}

// ============================================================================
// Cancellation
// ============================================================================

/// Cancels in-flight scans.
#[derive(Debug, Clone)]
pub struct ScanCanceller {
    tx: Arc<watch::Sender<bool>>,
}

impl ScanCanceller {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for ScanCanceller {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves once the flag flips to true. Never resolves if the canceller is
/// dropped without cancelling.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

// ============================================================================
// Scan Session
// ============================================================================

/// Runs scans against one feed and publishes into one store.
pub struct ScanSession {
    feed: Arc<dyn MarketDataFeed>,
    config: ScanConfig,
    ranker: ScannerRanker,
    limiter: SharedRateLimiter,
    store: SnapshotStore,
    guard: Arc<RwLock<RiskGuard>>,
}

impl ScanSession {
    pub fn new(feed: Arc<dyn MarketDataFeed>, config: ScanConfig) -> Self {
        let rpm = config
            .fetch
            .requests_per_minute
            .or(feed.capabilities().rate_limit_rpm)
            .unwrap_or(DEFAULT_REQUESTS_PER_MINUTE);
        let limiter = shared_limiter(feed.name(), rpm);
        let ranker = ScannerRanker::new(config.settings.clone());

        Self {
            feed,
            config,
            ranker,
            limiter,
            store: SnapshotStore::new(),
            // Limits are replaced by each scan's risk config
            guard: Arc::new(RwLock::new(RiskGuard::new(&RiskConfig::default()))),
        }
    }

    /// Use a custom catalyst classifier.
    pub fn with_classifier(mut self, classifier: Arc<dyn CatalystClassifier>) -> Self {
        self.ranker = ScannerRanker::with_classifier(self.config.settings.clone(), classifier);
        self
    }

    /// Publish into a shared store.
    pub fn with_store(mut self, store: SnapshotStore) -> Self {
        self.store = store;
        self
    }

    /// Share a risk guard (e.g., with whatever records trade results).
    pub fn with_guard(mut self, guard: Arc<RwLock<RiskGuard>>) -> Self {
        self.guard = guard;
        self
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn guard(&self) -> Arc<RwLock<RiskGuard>> {
        Arc::clone(&self.guard)
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn feed_name(&self) -> &str {
        self.feed.name()
    }

    /// Run one scan and publish the result.
    pub async fn run_scan(
        &self,
        universe: &dyn UniverseSource,
        criteria: &FilterCriteria,
        risk: &RiskConfig,
    ) -> Result<Arc<ScanResult>, ScanError> {
        self.run_scan_cancellable(universe, criteria, risk, &ScanCanceller::new())
            .await
    }

    /// Run one scan that `canceller` can abort. An aborted scan returns
    /// `ScanAborted` and publishes nothing.
    pub async fn run_scan_cancellable(
        &self,
        universe: &dyn UniverseSource,
        criteria: &FilterCriteria,
        risk: &RiskConfig,
        canceller: &ScanCanceller,
    ) -> Result<Arc<ScanResult>, ScanError> {
        risk.check()?;

        let mut rx = canceller.subscribe();
        if *rx.borrow() {
            return Err(ScanError::ScanAborted);
        }

        let result = tokio::select! {
            biased;
            _ = cancelled(&mut rx) => {
                warn!(feed = %self.feed.name(), "Scan cancelled, discarding partial results");
                return Err(ScanError::ScanAborted);
            }
            result = self.execute(universe, criteria, risk) => result?,
        };

        let published = self.store.publish(result).await;
        info!(
            scan_id = %published.scan_id,
            version = published.version,
            "{}",
            published.summary()
        );
        Ok(published)
    }

    async fn execute(
        &self,
        universe: &dyn UniverseSource,
        criteria: &FilterCriteria,
        risk: &RiskConfig,
    ) -> Result<ScanResult, ScanError> {
        let started = Instant::now();
        let timestamp = Utc::now();
        let scan_id = uuid::Uuid::new_v4().to_string();

        info!(scan_id = %scan_id, feed = %self.feed.name(), "Starting scan");

        self.feed
            .health_check()
            .await
            .map_err(|e| {
                let reason = if e.is_connectivity() {
                    "feed unreachable"
                } else {
                    "health check failed"
                };
                ScanError::FeedUnavailable(format!("{}: {}", reason, e))
            })?;

        let symbols = universe
            .load()
            .await
            .map(normalize_symbols)
            .map_err(|e| ScanError::FeedUnavailable(format!("universe unavailable: {}", e)))?;
        info!(scan_id = %scan_id, symbols = symbols.len(), "Universe loaded");

        let (batch, recoverable_failures) = self.fetch_all(&symbols).await;
        if !symbols.is_empty() && recoverable_failures == symbols.len() {
            return Err(ScanError::FeedUnavailable(format!(
                "all {} symbol fetches failed",
                symbols.len()
            )));
        }
        info!(
            scan_id = %scan_id,
            fetched = batch.len(),
            failed = batch.excluded.len(),
            "Fetch phase complete"
        );

        let mut outcome = self.ranker.scan(&batch, criteria);
        let plans_blocked = self.attach_plans(&mut outcome, &batch, risk).await;

        let duration_ms = started.elapsed().as_millis() as u64;
        let mut result =
            ScanResult::from_outcome(scan_id, batch.universe_size, outcome, timestamp, duration_ms);
        result.plans_blocked = plans_blocked;
        Ok(result)
    }

    // ========================================================================
    // Fetch Phase
    // ========================================================================

    /// Fetch every symbol; returns the frozen batch and the number of
    /// symbols that failed with a recoverable error.
    async fn fetch_all(&self, symbols: &[String]) -> (MarketBatch, usize) {
        let lookback = self.config.settings.bars_lookback();

        let results: Vec<(String, Result<SymbolData, FeedError>)> =
            stream::iter(symbols.iter().cloned())
                .map(|symbol| async move {
                    let result = self.fetch_symbol(&symbol, lookback).await;
                    (symbol, result)
                })
                .buffer_unordered(self.config.fetch.max_concurrency.max(1))
                .collect()
                .await;

        let mut batch = MarketBatch::new(symbols.len());
        let mut recoverable_failures = 0;

        for (symbol, result) in results {
            match result {
                Ok(data) => batch.insert(data),
                Err(e) => {
                    if e.is_recoverable() {
                        recoverable_failures += 1;
                    }
                    warn!(symbol = %symbol, error = %e, "Symbol fetch failed, skipping");
                    batch.excluded.push(ExcludedSymbol::from_error(
                        &symbol,
                        "fetch",
                        &ScanError::from_feed(&symbol, &e),
                    ));
                }
            }
        }
        batch.excluded.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        (batch, recoverable_failures)
    }

    async fn fetch_symbol(&self, symbol: &str, lookback: usize) -> Result<SymbolData, FeedError> {
        let mut snapshot = self
            .with_retry(symbol, || self.feed.fetch_snapshot(symbol))
            .await?;
        let mut bars = self
            .with_retry(symbol, || {
                self.feed.fetch_bars(symbol, Timeframe::Daily, lookback)
            })
            .await?;
        // The batch is keyed by the requested symbol, whatever the feed echoes
        snapshot.symbol = symbol.to_string();
        bars.symbol = symbol.to_string();

        let news = if self.feed.capabilities().news {
            match self.with_retry(symbol, || self.feed.fetch_news(symbol)).await {
                Ok(news) => news,
                Err(e) => {
                    debug!(symbol = %symbol, error = %e, "News unavailable, continuing without");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        Ok(SymbolData {
            snapshot,
            bars,
            news,
        })
    }

    /// Run a request through the rate limiter with bounded retries.
    ///
    /// The fetch timeout bounds each request on its own; waiting on the
    /// limiter or a backoff does not count against it.
    ///
    /// - `NotFound` and invalid responses fail immediately
    /// - `RateLimited` closes the shared gate for `retry_after` (or the backoff)
    /// - Network errors and timeouts back off exponentially
    async fn with_retry<T, F, Fut>(&self, symbol: &str, mut request: F) -> Result<T, FeedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FeedError>>,
    {
        let max_retries = self.config.fetch.max_retries;
        let base_backoff_ms = self.config.fetch.retry_backoff_ms;
        let timeout_secs = self.config.fetch.fetch_timeout_secs.max(1);
        let timeout = Duration::from_secs(timeout_secs);
        let mut attempt: u32 = 0;

        loop {
            self.limiter.acquire().await;

            let err = match tokio::time::timeout(timeout, request()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => FeedError::Timeout(format!(
                    "{} not answered within {}s",
                    symbol, timeout_secs
                )),
            };
            if !err.is_recoverable() || attempt >= max_retries {
                return Err(err);
            }

            let backoff =
                Duration::from_millis(base_backoff_ms.saturating_mul(1u64 << attempt.min(10)));
            attempt += 1;
            debug!(
                symbol = %symbol,
                attempt,
                error = %err,
                "Retrying feed request"
            );

            match err {
                FeedError::RateLimited { retry_after_secs } => {
                    let pause = retry_after_secs.map(Duration::from_secs).unwrap_or(backoff);
                    self.limiter.pause_for(pause).await;
                }
                _ => tokio::time::sleep(backoff).await,
            }
        }
    }

    // ========================================================================
    // Plans
    // ========================================================================

    /// Attach plans to the top opportunities. Returns true when the risk
    /// guard withheld them.
    async fn attach_plans(
        &self,
        outcome: &mut ScanOutcome,
        batch: &MarketBatch,
        risk: &RiskConfig,
    ) -> bool {
        let allowed = {
            let mut guard = self.guard.write().await;
            guard.set_limits(risk);
            guard.can_take_trade()
        };
        if !allowed {
            info!("Risk guard closed, publishing without trade plans");
            return true;
        }

        let mut built = 0;
        for opp in outcome.opportunities.iter_mut().take(risk.max_plans) {
            let (Some(indicators), Some(data)) =
                (outcome.indicators.get(&opp.symbol), batch.get(&opp.symbol))
            else {
                debug!(symbol = %opp.symbol, "No indicators, skipping plan");
                continue;
            };

            match build_plan(&data.snapshot, indicators, risk, TradeSide::from(opp.direction)) {
                Ok(plan) => {
                    opp.trade_plan = Some(plan);
                    built += 1;
                }
                Err(e) => {
                    warn!(symbol = %opp.symbol, error = %e, "Trade plan not built");
                    outcome
                        .excluded
                        .push(ExcludedSymbol::from_error(&opp.symbol, "plan", &e));
                }
            }
        }

        debug!(plans = built, "Trade plans attached");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_result(scan_id: &str) -> ScanResult {
        ScanResult::from_outcome(scan_id, 0, ScanOutcome::default(), Utc::now(), 0)
    }

    #[tokio::test]
    async fn test_store_versions() {
        let store = SnapshotStore::new();
        assert!(store.latest().await.is_none());
        assert_eq!(store.version().await, 0);

        let first = store.publish(empty_result("a")).await;
        assert_eq!(first.version, 1);

        let reader = store.clone();
        let second = store.publish(empty_result("b")).await;
        assert_eq!(second.version, 2);

        let latest = reader.latest().await.unwrap();
        assert_eq!(latest.scan_id, "b");
        // Earlier readers keep their snapshot
        assert_eq!(first.scan_id, "a");
    }

    #[tokio::test]
    async fn test_canceller() {
        let canceller = ScanCanceller::new();
        let mut rx = canceller.subscribe();
        assert!(!canceller.is_cancelled());

        let waiter = tokio::spawn(async move { cancelled(&mut rx).await });
        canceller.cancel();
        waiter.await.unwrap();
        assert!(canceller.is_cancelled());
    }
}

//! Generic REST JSON market data adapter.
//!
//! # Endpoints
//! - `GET /health` → any 2xx
//! - `GET /universe` → `["AAPL", "MSFT", ...]`
//! - `GET /bars/{symbol}?timeframe=1d&lookback=N` → `[Bar, ...]`
//! - `GET /snapshot/{symbol}` → `SymbolSnapshot`
//! - `GET /news/{symbol}` → `[NewsItem, ...]`
//!
//! # Status Mapping
//! - 404 → `NotFound`
//! - 429 → `RateLimited` (seconds from `Retry-After` when present)
//! - other non-2xx, connect failures → `Network`
//! - client timeouts → `Timeout`
//! - undecodable bodies → `InvalidResponse`

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use picker_common::config::FeedConfig;

use super::provider::{normalize_symbols, FeedCapabilities, FeedError, MarketDataFeed, UniverseSource};
use super::{Bar, BarSeries, NewsItem, SymbolSnapshot, Timeframe};

/// Default request timeout (seconds).
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// HTTP market data feed.
pub struct HttpFeed {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpFeed {
    /// Create a feed against `base_url` (e.g., "http://127.0.0.1:8600").
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_options(base_url, None, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create with an optional bearer token and request timeout.
    pub fn with_options(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        }
    }

    /// Create from config; `None` when no base URL is configured.
    pub fn from_config(config: &FeedConfig) -> Option<Self> {
        let base_url = config.base_url.as_deref().filter(|u| !u.is_empty())?;
        Some(Self::with_options(
            base_url,
            config.api_key.clone(),
            Duration::from_secs(config.timeout_secs.max(1)),
        ))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        resource: &str,
    ) -> Result<T, FeedError> {
        let response = self.send(path, query).await?;
        let response = check_status(response, resource)?;

        response
            .json::<T>()
            .await
            .map_err(|e| FeedError::InvalidResponse(format!("{}: {}", resource, e)))
    }

    async fn send(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response, FeedError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Fetching from feed");

        let mut request = self
            .client
            .get(&url)
            .header("accept", "application/json")
            .query(query);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        request.send().await.map_err(|e| {
            if e.is_timeout() {
                FeedError::Timeout(format!("{}: {}", path, e))
            } else if e.is_connect() {
                FeedError::Network(format!("Connection failed: {}", e))
            } else {
                FeedError::Network(e.to_string())
            }
        })
    }
}

/// `/{resource}/{symbol}` with the symbol percent-encoded ("BRK/B" → "BRK%2FB").
fn symbol_path(resource: &str, symbol: &str) -> String {
    format!("/{}/{}", resource, urlencoding::encode(symbol))
}

/// Map non-success statuses onto the feed error taxonomy.
fn check_status(response: reqwest::Response, resource: &str) -> Result<reqwest::Response, FeedError> {
    let status = response.status();

    if status.is_success() {
        return Ok(response);
    }
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(FeedError::NotFound(resource.to_string()));
    }
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        return Err(FeedError::RateLimited { retry_after_secs });
    }
    if status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status == reqwest::StatusCode::GATEWAY_TIMEOUT
    {
        return Err(FeedError::Timeout(format!("{}: HTTP {}", resource, status)));
    }

    Err(FeedError::Network(format!("{}: HTTP {}", resource, status)))
}

#[async_trait]
impl MarketDataFeed for HttpFeed {
    fn name(&self) -> &str {
        "http"
    }

    fn capabilities(&self) -> FeedCapabilities {
        FeedCapabilities::full()
    }

    async fn health_check(&self) -> Result<(), FeedError> {
        let response = self.send("/health", &[]).await?;
        check_status(response, "health").map(|_| ())
    }

    async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        lookback: usize,
    ) -> Result<BarSeries, FeedError> {
        let bars: Vec<Bar> = self
            .get_json(
                &symbol_path("bars", symbol),
                &[
                    ("timeframe", timeframe.to_api_freq().to_string()),
                    ("lookback", lookback.to_string()),
                ],
                symbol,
            )
            .await?;

        Ok(BarSeries::new(symbol, timeframe, bars).tail(lookback))
    }

    async fn fetch_snapshot(&self, symbol: &str) -> Result<SymbolSnapshot, FeedError> {
        let mut snapshot: SymbolSnapshot = self
            .get_json(&symbol_path("snapshot", symbol), &[], symbol)
            .await?;
        snapshot.symbol = symbol.to_string();
        Ok(snapshot)
    }

    async fn fetch_news(&self, symbol: &str) -> Result<Vec<NewsItem>, FeedError> {
        self.get_json(&symbol_path("news", symbol), &[], symbol)
            .await
    }
}

#[async_trait]
impl UniverseSource for HttpFeed {
    async fn load(&self) -> Result<Vec<String>, FeedError> {
        let symbols: Vec<String> = self.get_json("/universe", &[], "universe").await?;
        Ok(normalize_symbols(symbols))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash() {
        let feed = HttpFeed::new("http://localhost:8600/");
        assert_eq!(feed.base_url(), "http://localhost:8600");
    }

    #[test]
    fn test_symbol_path_encoded() {
        assert_eq!(symbol_path("snapshot", "AAA"), "/snapshot/AAA");
        assert_eq!(symbol_path("bars", "BRK/B"), "/bars/BRK%2FB");
        assert_eq!(symbol_path("news", "A B?"), "/news/A%20B%3F");
    }

    #[test]
    fn test_from_config_requires_url() {
        let mut config = FeedConfig::default();
        assert!(HttpFeed::from_config(&config).is_none());

        config.base_url = Some("http://feed.local".into());
        config.api_key = Some("secret".into());
        let feed = HttpFeed::from_config(&config).unwrap();
        assert_eq!(feed.base_url(), "http://feed.local");
        assert_eq!(feed.api_key.as_deref(), Some("secret"));
    }
}

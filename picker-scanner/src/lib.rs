//! Picker Scanner Library
//!
//! Daily equity scanner: filters a symbol universe, ranks the survivors by
//! price deviation, relative volume, volatility, relative strength and news
//! catalysts, and attaches risk-sized trade plans to the top opportunities.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         ScanSession                              │
//! │  health check → universe → bounded fetch → MarketBatch (frozen)  │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐            │
//! │  │  Universe    │→ │  Indicators  │→ │  Catalyst    │→ scoring   │
//! │  │  Filter      │  │  ATR / RS    │  │  Detector    │  buckets   │
//! │  └──────────────┘  └──────────────┘  └──────────────┘            │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  Trade Plan Builder + RiskGuard → ScanResult → SnapshotStore     │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let feed = Arc::new(StaticFeed::load(Path::new("fixture.json"))?);
//! let session = ScanSession::new(feed.clone(), ScanConfig::from_config(&config));
//! let result = session
//!     .run_scan(feed.as_ref(), &criteria, &RiskConfig::from_config(&config))
//!     .await?;
//! println!("{}", result.summary());
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod catalyst;
pub mod data;
pub mod error;
pub mod indicators;
pub mod plan;
pub mod report;
pub mod result;
pub mod scheduler;
pub mod screener;
pub mod session;

pub use catalyst::{CatalystClassifier, CatalystInfo, CatalystType, KeywordClassifier};
pub use data::{
    FeedError, HttpFeed, MarketBatch, MarketDataFeed, StaticFeed, StaticUniverse, SymbolSnapshot,
    UniverseSource,
};
pub use error::ScanError;
pub use indicators::{RsMode, TechnicalIndicators};
pub use plan::{build_plan, RiskConfig, RiskGuard, TradePlan, TradeSide};
pub use report::{ReportFormat, ScanReport};
pub use result::{ExcludedSymbol, Opportunity, ScanResult};
pub use scheduler::{ScanScheduler, SchedulerState, SchedulerStatus};
pub use screener::{FilterCriteria, ScanConfig, ScannerRanker};
pub use session::{ScanCanceller, ScanSession, SnapshotStore};

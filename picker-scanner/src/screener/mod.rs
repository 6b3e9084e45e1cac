//! Scanner/ranker module.
//!
//! Narrows a fetched universe to candidates and ranks them.
//!
//! # Pipeline
//!
//! ```text
//! MarketBatch ──▶ validate ──▶ filter ──▶ indicators ──▶ volatility filter
//!                                                              │
//!            ScanOutcome ◀── buckets + scores ◀── catalysts ◀──┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use picker_scanner::screener::{scan, FilterCriteria, ScanSettings};
//!
//! let outcome = scan(&batch, &FilterCriteria::default(), &ScanSettings::default());
//! for opp in &outcome.opportunities {
//!     println!("{} {:.1}", opp.symbol, opp.score);
//! }
//! ```

pub mod config;
pub mod engine;
pub mod filter;
pub mod scoring;

pub use config::{FetchSettings, ScanConfig, ScanSettings, DEFAULT_REQUESTS_PER_MINUTE};
pub use engine::{scan, ScannerRanker};
pub use filter::{filter, filter_by_volatility, FilterCriteria, FilterStage, FilterStageResult};
pub use scoring::{score_candidate, Candidate, ScoreComponents};

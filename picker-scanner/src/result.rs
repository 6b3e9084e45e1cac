//! Scan result records.
//!
//! One struct per result bucket, each built through a validating constructor
//! so that no NaN or out-of-range score ever reaches a consumer. A
//! [`ScanResult`] is immutable once published.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::catalyst::{CatalystInfo, CatalystType};
use crate::data::Direction;
use crate::error::ScanError;
use crate::indicators::TechnicalIndicators;
use crate::plan::TradePlan;
use crate::screener::{Candidate, FilterStageResult, ScoreComponents};

fn ensure_finite(symbol: &str, field: &str, value: f64) -> Result<f64, ScanError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ScanError::DataUnavailable {
            symbol: symbol.to_string(),
            reason: format!("{} is not a finite number", field),
        })
    }
}

// ============================================================================
// Excluded Symbols
// ============================================================================

/// A symbol dropped (or demoted) at some stage, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcludedSymbol {
    pub symbol: String,
    /// Stage that dropped it ("fetch", "validation", "indicators", "plan")
    pub stage: String,
    pub reason: String,
}

impl ExcludedSymbol {
    pub fn new(
        symbol: impl Into<String>,
        stage: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            stage: stage.into(),
            reason: reason.into(),
        }
    }

    pub fn from_error(symbol: &str, stage: &str, err: &ScanError) -> Self {
        Self::new(symbol, stage, err.to_string())
    }
}

// ============================================================================
// Bucket Entries
// ============================================================================

/// Entry in `deviation_results`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviationEntry {
    pub symbol: String,
    pub price: f64,
    pub deviation_pct: f64,
    pub direction: Direction,
}

impl DeviationEntry {
    pub fn new(symbol: &str, price: f64, deviation_pct: f64) -> Result<Self, ScanError> {
        Ok(Self {
            symbol: symbol.to_string(),
            price: ensure_finite(symbol, "price", price)?,
            deviation_pct: ensure_finite(symbol, "deviation_pct", deviation_pct)?,
            direction: Direction::from_deviation(deviation_pct),
        })
    }
}

/// Entry in `volume_results`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeEntry {
    pub symbol: String,
    pub price: f64,
    pub relative_volume: f64,
    pub volume: f64,
    pub avg_volume_20d: f64,
}

impl VolumeEntry {
    pub fn new(
        symbol: &str,
        price: f64,
        relative_volume: f64,
        volume: f64,
        avg_volume_20d: f64,
    ) -> Result<Self, ScanError> {
        Ok(Self {
            symbol: symbol.to_string(),
            price: ensure_finite(symbol, "price", price)?,
            relative_volume: ensure_finite(symbol, "relative_volume", relative_volume)?,
            volume: ensure_finite(symbol, "volume", volume)?,
            avg_volume_20d: ensure_finite(symbol, "avg_volume_20d", avg_volume_20d)?,
        })
    }
}

/// Entry in `atr_results`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtrEntry {
    pub symbol: String,
    pub price: f64,
    pub atr: f64,
    pub atr_pct: f64,
    pub atr_sector_ratio: f64,
}

impl AtrEntry {
    pub fn new(
        symbol: &str,
        price: f64,
        atr: f64,
        atr_pct: f64,
        atr_sector_ratio: f64,
    ) -> Result<Self, ScanError> {
        Ok(Self {
            symbol: symbol.to_string(),
            price: ensure_finite(symbol, "price", price)?,
            atr: ensure_finite(symbol, "atr", atr)?,
            atr_pct: ensure_finite(symbol, "atr_pct", atr_pct)?,
            atr_sector_ratio: ensure_finite(symbol, "atr_sector_ratio", atr_sector_ratio)?,
        })
    }
}

/// Entry in `catalyst_results`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalystEntry {
    pub symbol: String,
    pub price: f64,
    pub catalyst_types: Vec<CatalystType>,
    pub headline: Option<String>,
    pub url: Option<String>,
}

impl CatalystEntry {
    pub fn new(symbol: &str, price: f64, info: &CatalystInfo) -> Result<Self, ScanError> {
        Ok(Self {
            symbol: symbol.to_string(),
            price: ensure_finite(symbol, "price", price)?,
            catalyst_types: info.catalyst_types.iter().copied().collect(),
            headline: info.headline.clone(),
            url: info.url.clone(),
        })
    }
}

/// Entry in `strength_results`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrengthEntry {
    pub symbol: String,
    pub price: f64,
    pub relative_strength: f64,
    pub rs_percentile: f64,
}

impl StrengthEntry {
    pub fn new(
        symbol: &str,
        price: f64,
        relative_strength: f64,
        rs_percentile: f64,
    ) -> Result<Self, ScanError> {
        Ok(Self {
            symbol: symbol.to_string(),
            price: ensure_finite(symbol, "price", price)?,
            relative_strength: ensure_finite(symbol, "relative_strength", relative_strength)?,
            rs_percentile: ensure_finite(symbol, "rs_percentile", rs_percentile)?,
        })
    }
}

// ============================================================================
// Opportunity
// ============================================================================

/// A ranked opportunity, optionally with a trade plan attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub symbol: String,
    /// Composite score (0-100)
    pub score: f64,
    pub components: ScoreComponents,
    pub price: f64,
    pub deviation_pct: f64,
    /// Move of the farthest pre-market extreme from the previous close (%)
    #[serde(default)]
    pub premarket_deviation_pct: Option<f64>,
    pub direction: Direction,
    pub relative_volume: Option<f64>,
    pub atr_pct: Option<f64>,
    pub rs_percentile: Option<f64>,
    pub catalyst: Option<CatalystInfo>,
    pub trade_plan: Option<TradePlan>,
}

impl Opportunity {
    /// Build from a scored candidate; rejects non-finite values and scores
    /// outside [0, 100].
    pub fn new(candidate: &Candidate, components: ScoreComponents) -> Result<Self, ScanError> {
        let symbol = candidate.symbol();
        let score = ensure_finite(symbol, "score", components.total())?;
        if !(0.0..=100.0).contains(&score) {
            return Err(ScanError::DataUnavailable {
                symbol: symbol.to_string(),
                reason: format!("score {} outside [0, 100]", score),
            });
        }

        let deviation_pct = ensure_finite(symbol, "deviation_pct", candidate.deviation_pct())?;

        Ok(Self {
            symbol: symbol.to_string(),
            score,
            components,
            price: ensure_finite(symbol, "price", candidate.snapshot.current_price)?,
            deviation_pct,
            premarket_deviation_pct: candidate.snapshot.premarket_deviation_pct(),
            direction: Direction::from_deviation(deviation_pct),
            relative_volume: candidate.relative_volume().filter(|v| v.is_finite()),
            atr_pct: candidate.indicators.as_ref().map(|i| i.atr_pct),
            rs_percentile: candidate.indicators.as_ref().map(|i| i.rs_percentile),
            catalyst: candidate
                .catalyst
                .has_catalyst
                .then(|| candidate.catalyst.clone()),
            trade_plan: None,
        })
    }
}

// ============================================================================
// Scan Outcome / Result
// ============================================================================

/// Output of the synchronous ranking stage, before plans and publication.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanOutcome {
    /// Symbols that passed the universe filter
    pub candidates: usize,
    pub opportunities: Vec<Opportunity>,
    pub deviation_results: Vec<DeviationEntry>,
    pub volume_results: Vec<VolumeEntry>,
    pub atr_results: Vec<AtrEntry>,
    pub catalyst_results: Vec<CatalystEntry>,
    pub strength_results: Vec<StrengthEntry>,
    pub excluded: Vec<ExcludedSymbol>,
    pub filter_stages: Vec<FilterStageResult>,
    /// Indicators of the surviving candidates, for plan building
    pub indicators: BTreeMap<String, TechnicalIndicators>,
}

/// Immutable snapshot of one completed scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub scan_id: String,
    /// Store version assigned at publication
    pub version: u64,
    pub universe_size: usize,
    pub candidates: usize,
    pub opportunities: Vec<Opportunity>,
    pub deviation_results: Vec<DeviationEntry>,
    pub volume_results: Vec<VolumeEntry>,
    pub atr_results: Vec<AtrEntry>,
    pub catalyst_results: Vec<CatalystEntry>,
    pub strength_results: Vec<StrengthEntry>,
    pub excluded: Vec<ExcludedSymbol>,
    #[serde(default)]
    pub filter_stages: Vec<FilterStageResult>,
    /// Trade plans were withheld by the daily risk guard
    #[serde(default)]
    pub plans_blocked: bool,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ScanResult {
    /// Assemble a result from a ranking outcome.
    pub fn from_outcome(
        scan_id: impl Into<String>,
        universe_size: usize,
        outcome: ScanOutcome,
        timestamp: DateTime<Utc>,
        duration_ms: u64,
    ) -> Self {
        Self {
            scan_id: scan_id.into(),
            version: 0,
            universe_size,
            candidates: outcome.candidates,
            opportunities: outcome.opportunities,
            deviation_results: outcome.deviation_results,
            volume_results: outcome.volume_results,
            atr_results: outcome.atr_results,
            catalyst_results: outcome.catalyst_results,
            strength_results: outcome.strength_results,
            excluded: outcome.excluded,
            filter_stages: outcome.filter_stages,
            plans_blocked: false,
            timestamp,
            duration_ms,
        }
    }

    /// The top `n` opportunities.
    pub fn top(&self, n: usize) -> &[Opportunity] {
        &self.opportunities[..n.min(self.opportunities.len())]
    }

    pub fn opportunity(&self, symbol: &str) -> Option<&Opportunity> {
        self.opportunities.iter().find(|o| o.symbol == symbol)
    }

    /// Summary string for logging.
    pub fn summary(&self) -> String {
        format!(
            "Scanned {} symbols in {}ms: {} candidates, {} opportunities, {} excluded",
            self.universe_size,
            self.duration_ms,
            self.candidates,
            self.opportunities.len(),
            self.excluded.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SymbolSnapshot;

    fn candidate(price: f64, prev: f64) -> Candidate {
        Candidate::new(SymbolSnapshot {
            symbol: "AAA".into(),
            current_price: price,
            previous_close: prev,
            day_high: price,
            day_low: price,
            premarket_high: None,
            premarket_low: None,
            volume: 1_000.0,
            avg_volume_20d: 500.0,
            market_open: false,
        })
    }

    #[test]
    fn test_entries_reject_non_finite() {
        assert!(DeviationEntry::new("AAA", 10.0, f64::NAN).is_err());
        assert!(VolumeEntry::new("AAA", 10.0, f64::INFINITY, 1.0, 1.0).is_err());
        assert!(AtrEntry::new("AAA", 10.0, 0.5, 5.0, 1.2).is_ok());

        let entry = DeviationEntry::new("AAA", 9.0, -10.0).unwrap();
        assert_eq!(entry.direction, Direction::Down);
    }

    #[test]
    fn test_opportunity_score_range() {
        let ok = Opportunity::new(
            &candidate(20.0, 18.0),
            ScoreComponents {
                deviation_score: 40.0,
                volume_score: 15.0,
                ..Default::default()
            },
        )
        .unwrap();
        assert!((ok.score - 55.0).abs() < 0.001);
        assert_eq!(ok.direction, Direction::Up);
        assert!(ok.catalyst.is_none());
        assert!(ok.atr_pct.is_none());

        let too_high = ScoreComponents {
            deviation_score: 80.0,
            volume_score: 30.0,
            ..Default::default()
        };
        assert!(matches!(
            Opportunity::new(&candidate(20.0, 18.0), too_high),
            Err(ScanError::DataUnavailable { .. })
        ));
    }

    #[test]
    fn test_excluded_from_error() {
        let excluded = ExcludedSymbol::from_error(
            "AAA",
            "indicators",
            &ScanError::InsufficientData {
                needed: 15,
                available: 3,
            },
        );
        assert_eq!(excluded.stage, "indicators");
        assert!(excluded.reason.contains("need 15"));
    }

    #[test]
    fn test_result_serialization() {
        let result = ScanResult::from_outcome("scan-1", 3, ScanOutcome::default(), Utc::now(), 12);
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"deviation_results\""));
        assert!(json.contains("\"strength_results\""));

        let parsed: ScanResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, result);
        assert!(parsed.top(5).is_empty());
    }
}

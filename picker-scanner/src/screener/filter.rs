//! Universe filter.
//!
//! Narrowing passes over the scan universe:
//! 1. Snapshot predicates: price range, volume, |deviation| (optionally
//!    against the pre-market range), relative volume
//! 2. Volatility predicate: ATR ratio, once indicators exist
//!
//! Both passes preserve input order and are idempotent.

use serde::{Deserialize, Serialize};

use crate::data::SymbolSnapshot;

use super::scoring::Candidate;

// ============================================================================
// Filter Criteria
// ============================================================================

/// Bounds applied to the universe. An absent bound is no constraint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterCriteria {
    #[serde(default)]
    pub min_price: Option<f64>,
    #[serde(default)]
    pub max_price: Option<f64>,
    #[serde(default)]
    pub min_volume: Option<f64>,
    /// Minimum absolute deviation from the previous close (%)
    #[serde(default)]
    pub min_deviation_pct: Option<f64>,
    #[serde(default)]
    pub min_relative_volume: Option<f64>,
    /// Minimum ATR% relative to the scan average
    #[serde(default)]
    pub min_atr_ratio: Option<f64>,
    /// Let a larger pre-market move satisfy the deviation bound while the
    /// regular session is closed
    #[serde(default)]
    pub include_premarket: bool,
}

impl FilterCriteria {
    /// Whether a snapshot passes every snapshot-level bound.
    pub fn matches(&self, snapshot: &SymbolSnapshot) -> bool {
        let price = snapshot.current_price;

        if self.min_price.is_some_and(|min| price < min) {
            return false;
        }
        if self.max_price.is_some_and(|max| price > max) {
            return false;
        }
        if self.min_volume.is_some_and(|min| snapshot.volume < min) {
            return false;
        }
        if self
            .min_deviation_pct
            .is_some_and(|min| snapshot.gap_pct(self.include_premarket).abs() < min)
        {
            return false;
        }
        if let Some(min) = self.min_relative_volume {
            // Undefined ratio (zero average volume) never satisfies a bound
            match snapshot.relative_volume() {
                Some(rel) if rel >= min => {}
                _ => return false,
            }
        }

        true
    }

    /// Whether a candidate passes the volatility bound.
    pub fn matches_volatility(&self, candidate: &Candidate) -> bool {
        match self.min_atr_ratio {
            None => true,
            Some(min) => candidate
                .indicators
                .as_ref()
                .is_some_and(|ind| ind.atr_sector_ratio >= min),
        }
    }

    /// Short human-readable summary for reports.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(v) = self.min_price {
            parts.push(format!("price>={}", v));
        }
        if let Some(v) = self.max_price {
            parts.push(format!("price<={}", v));
        }
        if let Some(v) = self.min_volume {
            parts.push(format!("volume>={}", v));
        }
        if let Some(v) = self.min_deviation_pct {
            parts.push(format!("|dev|>={}%", v));
        }
        if let Some(v) = self.min_relative_volume {
            parts.push(format!("relvol>={}", v));
        }
        if let Some(v) = self.min_atr_ratio {
            parts.push(format!("atr_ratio>={}", v));
        }
        if self.include_premarket {
            parts.push("pre-market".to_string());
        }

        if parts.is_empty() {
            "no filters".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Apply the snapshot predicates.
pub fn filter(universe: &[SymbolSnapshot], criteria: &FilterCriteria) -> Vec<SymbolSnapshot> {
    universe
        .iter()
        .filter(|s| criteria.matches(s))
        .cloned()
        .collect()
}

/// Apply the ATR-ratio predicate to candidates with indicators.
pub fn filter_by_volatility(candidates: &[Candidate], criteria: &FilterCriteria) -> Vec<Candidate> {
    candidates
        .iter()
        .filter(|c| criteria.matches_volatility(c))
        .cloned()
        .collect()
}

// ============================================================================
// Funnel Statistics
// ============================================================================

/// Filter stage identifier for tracking where symbols are eliminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterStage {
    /// Snapshot validation after fetching
    Validation,
    /// Price / volume / deviation / relative volume
    Universe,
    /// ATR ratio
    Volatility,
}

impl std::fmt::Display for FilterStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Universe => write!(f, "universe"),
            Self::Volatility => write!(f, "volatility"),
        }
    }
}

/// Result of a filtering stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterStageResult {
    pub stage: FilterStage,
    pub input: usize,
    pub passed: usize,
    pub eliminated: usize,
    /// Elimination rate (%)
    pub elimination_rate: f64,
}

impl FilterStageResult {
    pub fn new(stage: FilterStage, input: usize, passed: usize) -> Self {
        let eliminated = input.saturating_sub(passed);
        let elimination_rate = if input > 0 {
            (eliminated as f64 / input as f64) * 100.0
        } else {
            0.0
        };

        Self {
            stage,
            input,
            passed,
            eliminated,
            elimination_rate,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

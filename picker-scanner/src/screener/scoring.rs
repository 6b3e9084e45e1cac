//! Composite opportunity scoring.
//!
//! Four components with fixed weights:
//! - Deviation (40): |deviation%| against a cap
//! - Volume (30): relative volume against a cap
//! - Technical (20): half RS percentile, half ATR ratio against a cap
//! - Catalyst (10): any detected catalyst
//!
//! No intermediate rounding; every component is clamped into its range.

use serde::{Deserialize, Serialize};

use crate::catalyst::CatalystInfo;
use crate::data::SymbolSnapshot;
use crate::indicators::TechnicalIndicators;

use super::config::ScanSettings;

pub const DEVIATION_WEIGHT: f64 = 40.0;
pub const VOLUME_WEIGHT: f64 = 30.0;
pub const TECHNICAL_WEIGHT: f64 = 20.0;
pub const CATALYST_WEIGHT: f64 = 10.0;

// ============================================================================
// Candidate
// ============================================================================

/// A symbol that passed the universe filter, with everything derived so far.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub snapshot: SymbolSnapshot,
    /// `None` when indicators could not be computed
    pub indicators: Option<TechnicalIndicators>,
    pub catalyst: CatalystInfo,
}

impl Candidate {
    pub fn new(snapshot: SymbolSnapshot) -> Self {
        Self {
            snapshot,
            indicators: None,
            catalyst: CatalystInfo::none(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.snapshot.symbol
    }

    pub fn deviation_pct(&self) -> f64 {
        self.snapshot.deviation_pct()
    }

    pub fn relative_volume(&self) -> Option<f64> {
        self.snapshot.relative_volume()
    }

    pub fn atr_ratio(&self) -> Option<f64> {
        self.indicators.as_ref().map(|i| i.atr_sector_ratio)
    }
}

// ============================================================================
// Score Components
// ============================================================================

/// Per-component breakdown of a candidate's score.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreComponents {
    /// 0-40
    pub deviation_score: f64,
    /// 0-30
    pub volume_score: f64,
    /// 0-20
    pub technical_score: f64,
    /// 0 or 10
    pub catalyst_score: f64,
}

impl ScoreComponents {
    /// Composite score, 0-100.
    pub fn total(&self) -> f64 {
        self.deviation_score + self.volume_score + self.technical_score + self.catalyst_score
    }
}

/// `value / cap` clamped to [0, 1]; non-finite input scores nothing.
fn capped_fraction(value: f64, cap: f64) -> f64 {
    if !value.is_finite() || cap <= 0.0 {
        return 0.0;
    }
    (value / cap).clamp(0.0, 1.0)
}

/// Score one candidate.
pub fn score_candidate(candidate: &Candidate, settings: &ScanSettings) -> ScoreComponents {
    let deviation_score = DEVIATION_WEIGHT
        * capped_fraction(candidate.deviation_pct().abs(), settings.deviation_cap);

    let volume_score = candidate
        .relative_volume()
        .map(|rel| VOLUME_WEIGHT * capped_fraction(rel, settings.volume_cap))
        .unwrap_or(0.0);

    let technical_score = candidate
        .indicators
        .as_ref()
        .map(|ind| {
            let strength = capped_fraction(ind.rs_percentile, 100.0);
            let volatility = capped_fraction(ind.atr_sector_ratio, settings.atr_ratio_cap);
            TECHNICAL_WEIGHT * (0.5 * strength + 0.5 * volatility)
        })
        .unwrap_or(0.0);

    let catalyst_score = if candidate.catalyst.has_catalyst {
        CATALYST_WEIGHT
    } else {
        0.0
    };

    ScoreComponents {
        deviation_score,
        volume_score,
        technical_score,
        catalyst_score,
    }
}

//! Technical indicator library.
//!
//! Pure functions over bar slices:
//! - ATR (simple average of true ranges)
//! - Relative strength (percent return or distance from EMA)
//! - EMA / SMA helpers
//! - Percentile ranking across a scan's candidates

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::data::Bar;
use crate::error::ScanError;

/// Trading days per week, used to turn week lookbacks into bar counts.
pub const BARS_PER_WEEK: usize = 5;

/// Default ATR period.
pub const DEFAULT_ATR_PERIOD: usize = 14;

/// Default relative-strength lookback (weeks).
pub const DEFAULT_RS_LOOKBACK_WEEKS: usize = 13;

// ============================================================================
// Indicator Values
// ============================================================================

/// Indicators computed for one candidate in one scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnicalIndicators {
    pub atr: f64,
    /// ATR as a percent of the current price
    pub atr_pct: f64,
    /// `atr_pct` over the mean `atr_pct` of the scan's candidates
    pub atr_sector_ratio: f64,
    /// Raw relative strength (percent)
    pub relative_strength: f64,
    /// Rank of `relative_strength` among the candidates, 0-100
    pub rs_percentile: f64,
}

/// How relative strength is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RsMode {
    /// Percent return over the lookback
    #[default]
    Return,
    /// Percent distance of the last close from its EMA
    Ema,
}

impl std::str::FromStr for RsMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "return" | "roc" => Ok(Self::Return),
            "ema" => Ok(Self::Ema),
            _ => Err(format!("Unknown relative strength mode: {}", s)),
        }
    }
}

impl std::fmt::Display for RsMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Return => write!(f, "return"),
            Self::Ema => write!(f, "ema"),
        }
    }
}

// ============================================================================
// ATR
// ============================================================================

/// Average true range over the last `period` bars.
///
/// Needs `period + 1` bars so every true range has a previous close.
pub fn compute_atr(bars: &[Bar], period: usize) -> Result<f64, ScanError> {
    if period == 0 {
        return Err(ScanError::InvalidConfig("ATR period must be positive".into()));
    }
    if bars.len() < period + 1 {
        return Err(ScanError::InsufficientData {
            needed: period + 1,
            available: bars.len(),
        });
    }

    let window = &bars[bars.len() - (period + 1)..];
    let total: f64 = window
        .windows(2)
        .map(|pair| pair[1].true_range(pair[0].close))
        .sum();

    Ok(total / period as f64)
}

// ============================================================================
// Relative Strength
// ============================================================================

/// Relative strength of the latest close over `lookback_weeks`.
pub fn compute_relative_strength(
    bars: &[Bar],
    lookback_weeks: usize,
    mode: RsMode,
) -> Result<f64, ScanError> {
    let lookback = lookback_weeks * BARS_PER_WEEK;
    if lookback == 0 {
        return Err(ScanError::InvalidConfig(
            "relative strength lookback must be positive".into(),
        ));
    }

    match mode {
        RsMode::Return => {
            if bars.len() < lookback + 1 {
                return Err(ScanError::InsufficientData {
                    needed: lookback + 1,
                    available: bars.len(),
                });
            }
            let last = bars[bars.len() - 1].close;
            let base = bars[bars.len() - 1 - lookback].close;
            Ok((last / base - 1.0) * 100.0)
        }
        RsMode::Ema => {
            let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
            let average = ema(&closes, lookback).ok_or(ScanError::InsufficientData {
                needed: lookback,
                available: closes.len(),
            })?;
            let last = closes[closes.len() - 1];
            Ok((last / average - 1.0) * 100.0)
        }
    }
}

/// Bars required by the configured indicators.
pub fn required_bars(atr_period: usize, lookback_weeks: usize) -> usize {
    (atr_period + 1).max(lookback_weeks * BARS_PER_WEEK + 1)
}

// ============================================================================
// Moving Averages
// ============================================================================

/// Exponential moving average of the whole slice, seeded with the SMA of the
/// first `period` values.
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }

    let k = 2.0 / (period as f64 + 1.0);
    let seed = values[..period].iter().sum::<f64>() / period as f64;

    Some(
        values[period..]
            .iter()
            .fold(seed, |prev, value| value * k + prev * (1.0 - k)),
    )
}

/// Simple moving average of the last `period` values.
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

// ============================================================================
// Percentile Ranking
// ============================================================================

/// Rank raw values into percentiles (0-100).
///
/// Values are sorted ascending (ties by symbol). Percentile is
/// `index / (n - 1) * 100`, or 50 for a single value; tied values share the
/// lowest index of their group. Non-finite values are dropped.
pub fn rank_percentile(values: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
    let mut ordered: Vec<(&String, f64)> = values
        .iter()
        .filter(|(_, v)| v.is_finite())
        .map(|(s, v)| (s, *v))
        .collect();

    ordered.sort_by(|a, b| {
        a.1.partial_cmp(&b.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });

    let n = ordered.len();
    let mut ranks = BTreeMap::new();
    if n == 1 {
        ranks.insert(ordered[0].0.clone(), 50.0);
        return ranks;
    }

    let mut group_start = 0;
    for (i, (symbol, value)) in ordered.iter().enumerate() {
        if i > 0 && *value != ordered[i - 1].1 {
            group_start = i;
        }
        ranks.insert((*symbol).clone(), group_start as f64 / (n - 1) as f64 * 100.0);
    }

    ranks
}

// ============================================================================
// Tests
// ============================================================================

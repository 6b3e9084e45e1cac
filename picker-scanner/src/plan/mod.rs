//! Trade plan builder.
//!
//! Turns a ranked opportunity into concrete numbers:
//! - Entry at the current price
//! - Stop a multiple of ATR away from entry
//! - Target at the configured reward/risk ratio
//! - Share count from the dollar risk budget, capped by account size
//!
//! The daily [`RiskGuard`] decides whether plans are attached at all.

mod guard;

pub use guard::{RiskGuard, TradeOutcome, TradeRecord, TradingSummary};

use serde::{Deserialize, Serialize};

use picker_common::config::Config;
use picker_common::validation::{Validate, ValidationError, ValidationResult};

use crate::data::{Direction, SymbolSnapshot};
use crate::error::ScanError;
use crate::indicators::TechnicalIndicators;

// ============================================================================
// Risk Config
// ============================================================================

/// Account-level risk parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Account size ($)
    #[serde(default = "default_account_size")]
    pub account_size: f64,

    /// Daily loss that stops new trades ($)
    #[serde(default = "default_max_daily_loss")]
    pub max_daily_loss: f64,

    /// Dollar risk per trade
    #[serde(default = "default_max_risk_per_trade")]
    pub max_risk_per_trade: f64,

    /// Stop distance in ATRs
    #[serde(default = "default_stop_atr_multiple")]
    pub stop_atr_multiple: f64,

    /// Target reward per unit of risk
    #[serde(default = "default_reward_risk_ratio")]
    pub reward_risk_ratio: f64,

    /// Largest position as a percent of the account
    #[serde(default = "default_max_position_pct")]
    pub max_position_pct: f64,

    /// Consecutive losses that stop new trades
    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: u32,

    /// Plans built per scan (top opportunities)
    #[serde(default = "default_max_plans")]
    pub max_plans: usize,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            account_size: default_account_size(),
            max_daily_loss: default_max_daily_loss(),
            max_risk_per_trade: default_max_risk_per_trade(),
            stop_atr_multiple: default_stop_atr_multiple(),
            reward_risk_ratio: default_reward_risk_ratio(),
            max_position_pct: default_max_position_pct(),
            max_consecutive_losses: default_max_consecutive_losses(),
            max_plans: default_max_plans(),
        }
    }
}

fn default_account_size() -> f64 {
    10_000.0
}

fn default_max_daily_loss() -> f64 {
    100.0
}

fn default_max_risk_per_trade() -> f64 {
    50.0
}

fn default_stop_atr_multiple() -> f64 {
    1.5
}

fn default_reward_risk_ratio() -> f64 {
    2.0
}

fn default_max_position_pct() -> f64 {
    100.0
}

fn default_max_consecutive_losses() -> u32 {
    3
}

fn default_max_plans() -> usize {
    5
}

impl RiskConfig {
    /// Build from the shared config, filling gaps with defaults.
    pub fn from_config(config: &Config) -> Self {
        let defaults = Self::default();
        let Some(ref risk) = config.risk else {
            return defaults;
        };

        Self {
            account_size: risk.account_size.unwrap_or(defaults.account_size),
            max_daily_loss: risk.max_daily_loss.unwrap_or(defaults.max_daily_loss),
            max_risk_per_trade: risk
                .max_risk_per_trade
                .unwrap_or(defaults.max_risk_per_trade),
            stop_atr_multiple: risk.stop_atr_multiple.unwrap_or(defaults.stop_atr_multiple),
            reward_risk_ratio: risk.reward_risk_ratio.unwrap_or(defaults.reward_risk_ratio),
            max_position_pct: risk.max_position_pct.unwrap_or(defaults.max_position_pct),
            max_consecutive_losses: risk
                .max_consecutive_losses
                .unwrap_or(defaults.max_consecutive_losses),
            max_plans: risk.max_plans.unwrap_or(defaults.max_plans),
        }
    }

    /// Validate, mapping failures onto the scan error type.
    pub fn check(&self) -> Result<(), ScanError> {
        self.validate()
            .map_err(|e| ScanError::InvalidConfig(e.to_string()))
    }
}

impl Validate for RiskConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        let positives = [
            ("account_size", self.account_size),
            ("max_daily_loss", self.max_daily_loss),
            ("max_risk_per_trade", self.max_risk_per_trade),
            ("stop_atr_multiple", self.stop_atr_multiple),
            ("reward_risk_ratio", self.reward_risk_ratio),
            ("max_position_pct", self.max_position_pct),
        ];
        for (field, value) in positives {
            if !value.is_finite() || value <= 0.0 {
                errors.push(ValidationError::InvalidValue {
                    field: field.into(),
                    reason: format!("must be positive, got {}", value),
                });
            }
        }

        if self.max_position_pct > 100.0 {
            errors.push(ValidationError::InvalidValue {
                field: "max_position_pct".into(),
                reason: format!("must be at most 100, got {}", self.max_position_pct),
            });
        }
        if self.max_risk_per_trade > self.account_size {
            errors.push(ValidationError::Conflict {
                reason: format!(
                    "max_risk_per_trade {} exceeds account_size {}",
                    self.max_risk_per_trade, self.account_size
                ),
            });
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ValidationError::Multiple(errors)),
        }
    }
}

// ============================================================================
// Trade Plan
// ============================================================================

/// Trade side, from the direction of the move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Long,
    Short,
}

impl From<Direction> for TradeSide {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Up => Self::Long,
            Direction::Down => Self::Short,
        }
    }
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// Concrete entry/stop/target numbers for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradePlan {
    pub symbol: String,
    pub side: TradeSide,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// Whole shares
    pub position_size: u64,
    pub risk_per_share: f64,
    pub risk_reward_ratio: f64,
    pub potential_loss: f64,
    pub potential_profit: f64,
}

/// Build a trade plan.
///
/// Fails with `DegenerateRisk` when the stop distance is not positive
/// (e.g., zero ATR) or the stop lands at or below zero.
pub fn build_plan(
    snapshot: &SymbolSnapshot,
    indicators: &TechnicalIndicators,
    risk: &RiskConfig,
    side: TradeSide,
) -> Result<TradePlan, ScanError> {
    let entry = snapshot.current_price;
    let stop_distance = risk.stop_atr_multiple * indicators.atr;
    let stop_loss = match side {
        TradeSide::Long => entry - stop_distance,
        TradeSide::Short => entry + stop_distance,
    };

    let risk_per_share = (entry - stop_loss).abs();
    // A long stop at or below zero can never trigger
    if !risk_per_share.is_finite() || risk_per_share <= 0.0 || stop_loss <= 0.0 {
        return Err(ScanError::DegenerateRisk {
            symbol: snapshot.symbol.clone(),
            risk_per_share,
        });
    }

    let reward_per_share = risk.reward_risk_ratio * risk_per_share;
    let take_profit = match side {
        TradeSide::Long => entry + reward_per_share,
        TradeSide::Short => entry - reward_per_share,
    };

    let by_risk = (risk.max_risk_per_trade / risk_per_share).floor();
    let by_account = (risk.account_size * risk.max_position_pct / 100.0 / entry).floor();
    let position_size = by_risk.min(by_account).max(0.0) as u64;
    let shares = position_size as f64;

    Ok(TradePlan {
        symbol: snapshot.symbol.clone(),
        side,
        entry_price: entry,
        stop_loss,
        take_profit,
        position_size,
        risk_per_share,
        risk_reward_ratio: risk.reward_risk_ratio,
        potential_loss: shares * risk_per_share,
        potential_profit: shares * reward_per_share,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use picker_common::config::RiskSettings;

    fn snapshot(price: f64) -> SymbolSnapshot {
        SymbolSnapshot {
            symbol: "AAA".into(),
            current_price: price,
            previous_close: 18.0,
            day_high: price,
            day_low: price,
            premarket_high: None,
            premarket_low: None,
            volume: 2_000_000.0,
            avg_volume_20d: 500_000.0,
            market_open: false,
        }
    }

    fn indicators(atr: f64) -> TechnicalIndicators {
        TechnicalIndicators {
            atr,
            atr_pct: 3.0,
            atr_sector_ratio: 1.0,
            relative_strength: 0.0,
            rs_percentile: 50.0,
        }
    }

    #[test]
    fn test_long_plan() {
        // entry 20, ATR 0.6 → stop 19.1, rps 0.9, 55 shares
        let plan = build_plan(&snapshot(20.0), &indicators(0.6), &RiskConfig::default(), TradeSide::Long)
            .unwrap();
        assert!((plan.stop_loss - 19.1).abs() < 0.001);
        assert!((plan.risk_per_share - 0.9).abs() < 0.001);
        assert!((plan.take_profit - 21.8).abs() < 0.001);
        assert_eq!(plan.position_size, 55);
        assert!((plan.potential_loss - 49.5).abs() < 0.001);
        assert!((plan.potential_profit - 99.0).abs() < 0.001);
        assert!((plan.risk_reward_ratio - 2.0).abs() < 0.001);
    }

    #[test]
    fn test_short_plan_mirrors() {
        let plan = build_plan(&snapshot(20.0), &indicators(0.6), &RiskConfig::default(), TradeSide::Short)
            .unwrap();
        assert!((plan.stop_loss - 20.9).abs() < 0.001);
        assert!((plan.take_profit - 18.2).abs() < 0.001);
        assert_eq!(plan.side, TradeSide::Short);
    }

    #[test]
    fn test_zero_atr_is_degenerate() {
        let err = build_plan(&snapshot(20.0), &indicators(0.0), &RiskConfig::default(), TradeSide::Long)
            .unwrap_err();
        assert!(matches!(err, ScanError::DegenerateRisk { ref symbol, .. } if symbol == "AAA"));
    }

    #[test]
    fn test_long_stop_below_zero_is_degenerate() {
        // entry 2, ATR 2 → stop 2 - 3 = -1
        let err = build_plan(&snapshot(2.0), &indicators(2.0), &RiskConfig::default(), TradeSide::Long)
            .unwrap_err();
        assert!(matches!(err, ScanError::DegenerateRisk { .. }));

        // The same distance short of entry is fine
        let plan = build_plan(&snapshot(2.0), &indicators(2.0), &RiskConfig::default(), TradeSide::Short)
            .unwrap();
        assert!((plan.stop_loss - 5.0).abs() < 0.001);
    }

    #[test]
    fn test_position_capped_by_account() {
        let risk = RiskConfig {
            max_position_pct: 25.0,
            ..Default::default()
        };
        // By risk: 50 / 0.015 = 3333; by account: 2500 / 1 = 2500
        let plan = build_plan(&snapshot(1.0), &indicators(0.01), &risk, TradeSide::Long).unwrap();
        assert_eq!(plan.position_size, 2500);
    }

    #[test]
    fn test_side_from_direction() {
        assert_eq!(TradeSide::from(Direction::Up), TradeSide::Long);
        assert_eq!(TradeSide::from(Direction::Down), TradeSide::Short);
    }

    #[test]
    fn test_from_config() {
        let config = Config {
            risk: Some(RiskSettings {
                account_size: Some(25_000.0),
                max_plans: Some(3),
                ..Default::default()
            }),
            ..Default::default()
        };
        let risk = RiskConfig::from_config(&config);
        assert!((risk.account_size - 25_000.0).abs() < 0.001);
        assert_eq!(risk.max_plans, 3);
        assert!((risk.stop_atr_multiple - 1.5).abs() < 0.001);
    }

    #[test]
    fn test_validation() {
        assert!(RiskConfig::default().check().is_ok());

        let bad = RiskConfig {
            account_size: 0.0,
            reward_risk_ratio: -1.0,
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(ValidationError::Multiple(_))));
        assert!(matches!(bad.check(), Err(ScanError::InvalidConfig(_))));

        let conflict = RiskConfig {
            max_risk_per_trade: 20_000.0,
            ..Default::default()
        };
        assert!(matches!(
            conflict.validate(),
            Err(ValidationError::Conflict { .. })
        ));
    }
}

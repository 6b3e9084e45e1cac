//! Daily risk guard.
//!
//! Stops new trade plans once the day's realized loss reaches the limit or
//! too many losses occur in a row. Stats reset at the start of each day.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::RiskConfig;

/// Result of a closed trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeOutcome {
    Win,
    Loss,
    /// Breakeven
    Scratch,
}

/// A recorded trade result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub outcome: TradeOutcome,
    pub pnl: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Aggregate statistics over all recorded trades.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradingSummary {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    /// Win rate (%)
    pub win_rate: f64,
    pub total_pnl: f64,
    pub avg_pnl: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub daily_pnl: f64,
    pub consecutive_losses: u32,
}

/// Daily loss and losing-streak limits.
#[derive(Debug, Clone)]
pub struct RiskGuard {
    max_daily_loss: f64,
    max_consecutive_losses: u32,
    daily_pnl: f64,
    consecutive_losses: u32,
    trades: Vec<TradeRecord>,
}

impl RiskGuard {
    pub fn new(config: &RiskConfig) -> Self {
        Self {
            max_daily_loss: config.max_daily_loss,
            max_consecutive_losses: config.max_consecutive_losses,
            daily_pnl: 0.0,
            consecutive_losses: 0,
            trades: Vec::new(),
        }
    }

    /// Apply the limits from `config`, keeping today's counters.
    pub fn set_limits(&mut self, config: &RiskConfig) {
        self.max_daily_loss = config.max_daily_loss;
        self.max_consecutive_losses = config.max_consecutive_losses;
    }

    /// Whether another trade may be taken today.
    pub fn can_take_trade(&self) -> bool {
        if self.daily_pnl <= -self.max_daily_loss {
            info!(daily_pnl = self.daily_pnl, "Daily loss limit reached");
            return false;
        }
        if self.consecutive_losses >= self.max_consecutive_losses {
            info!(
                consecutive_losses = self.consecutive_losses,
                "Consecutive loss limit reached"
            );
            return false;
        }
        true
    }

    /// Record a closed trade.
    pub fn record_trade(&mut self, symbol: impl Into<String>, outcome: TradeOutcome, pnl: f64) {
        self.daily_pnl += pnl;
        if outcome == TradeOutcome::Loss {
            self.consecutive_losses += 1;
        } else {
            self.consecutive_losses = 0;
        }

        let record = TradeRecord {
            symbol: symbol.into(),
            outcome,
            pnl,
            recorded_at: Utc::now(),
        };
        info!(
            symbol = %record.symbol,
            outcome = ?outcome,
            pnl,
            daily_pnl = self.daily_pnl,
            consecutive_losses = self.consecutive_losses,
            "Trade recorded"
        );
        self.trades.push(record);
    }

    /// Start a new trading day. Trade history is kept.
    pub fn reset_daily(&mut self) {
        self.daily_pnl = 0.0;
        self.consecutive_losses = 0;
        info!("Daily trading statistics reset");
    }

    pub fn daily_pnl(&self) -> f64 {
        self.daily_pnl
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.consecutive_losses
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn summary(&self) -> TradingSummary {
        let total_trades = self.trades.len();
        if total_trades == 0 {
            return TradingSummary {
                daily_pnl: self.daily_pnl,
                consecutive_losses: self.consecutive_losses,
                ..Default::default()
            };
        }

        let wins = self
            .trades
            .iter()
            .filter(|t| t.outcome == TradeOutcome::Win)
            .count();
        let losses = self
            .trades
            .iter()
            .filter(|t| t.outcome == TradeOutcome::Loss)
            .count();
        let total_pnl: f64 = self.trades.iter().map(|t| t.pnl).sum();

        let largest_win = self
            .trades
            .iter()
            .filter(|t| t.outcome == TradeOutcome::Win)
            .map(|t| t.pnl)
            .fold(0.0, f64::max);
        let largest_loss = self
            .trades
            .iter()
            .filter(|t| t.outcome == TradeOutcome::Loss)
            .map(|t| t.pnl)
            .fold(0.0, f64::min);

        TradingSummary {
            total_trades,
            wins,
            losses,
            win_rate: wins as f64 / total_trades as f64 * 100.0,
            total_pnl,
            avg_pnl: total_pnl / total_trades as f64,
            largest_win,
            largest_loss,
            daily_pnl: self.daily_pnl,
            consecutive_losses: self.consecutive_losses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_guard_allows_trades() {
        let guard = RiskGuard::new(&RiskConfig::default());
        assert!(guard.can_take_trade());
        assert_eq!(guard.summary().total_trades, 0);
    }

    #[test]
    fn test_daily_loss_limit() {
        let mut guard = RiskGuard::new(&RiskConfig::default());
        guard.record_trade("AAA", TradeOutcome::Loss, -60.0);
        assert!(guard.can_take_trade());
        guard.record_trade("BBB", TradeOutcome::Loss, -40.0);
        assert!(!guard.can_take_trade());

        guard.reset_daily();
        assert!(guard.can_take_trade());
        assert_eq!(guard.trades().len(), 2);
    }

    #[test]
    fn test_consecutive_losses() {
        let mut guard = RiskGuard::new(&RiskConfig::default());
        guard.record_trade("A", TradeOutcome::Loss, -1.0);
        guard.record_trade("B", TradeOutcome::Loss, -1.0);
        guard.record_trade("C", TradeOutcome::Scratch, 0.0);
        assert_eq!(guard.consecutive_losses(), 0);

        for symbol in ["D", "E", "F"] {
            guard.record_trade(symbol, TradeOutcome::Loss, -1.0);
        }
        assert!(!guard.can_take_trade());
    }

    #[test]
    fn test_set_limits_keeps_counters() {
        let mut guard = RiskGuard::new(&RiskConfig::default());
        guard.record_trade("AAA", TradeOutcome::Loss, -150.0);
        assert!(!guard.can_take_trade());

        let relaxed = RiskConfig {
            max_daily_loss: 1000.0,
            max_consecutive_losses: 5,
            ..Default::default()
        };
        guard.set_limits(&relaxed);
        assert!(guard.can_take_trade());
        assert!((guard.daily_pnl() + 150.0).abs() < 0.001);
        assert_eq!(guard.consecutive_losses(), 1);
    }

    #[test]
    fn test_summary() {
        let mut guard = RiskGuard::new(&RiskConfig::default());
        guard.record_trade("A", TradeOutcome::Win, 100.0);
        guard.record_trade("B", TradeOutcome::Loss, -50.0);
        guard.record_trade("C", TradeOutcome::Win, 30.0);
        guard.record_trade("D", TradeOutcome::Scratch, 0.0);

        let summary = guard.summary();
        assert_eq!(summary.total_trades, 4);
        assert_eq!(summary.wins, 2);
        assert_eq!(summary.losses, 1);
        assert!((summary.win_rate - 50.0).abs() < 0.001);
        assert!((summary.total_pnl - 80.0).abs() < 0.001);
        assert!((summary.avg_pnl - 20.0).abs() < 0.001);
        assert!((summary.largest_win - 100.0).abs() < 0.001);
        assert!((summary.largest_loss + 50.0).abs() < 0.001);
    }
}

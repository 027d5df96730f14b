//! Performance summary over realized trades.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use statrs::statistics::Statistics;

use crate::models::Trade;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceSummary {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    /// Percent
    pub win_rate: f64,
    pub avg_win_percent: f64,
    pub avg_loss_percent: f64,
    /// Gross profit / gross loss; `None` when there are no losses
    pub profit_factor: Option<f64>,
    pub total_pnl_usd: Decimal,
    pub best_trade_percent: f64,
    pub worst_trade_percent: f64,
    pub avg_hold_hours: f64,
    /// Sample standard deviation of pnl percent
    pub pnl_std_dev: f64,
}

impl PerformanceSummary {
    pub fn from_trades(trades: &[Trade]) -> Self {
        if trades.is_empty() {
            return Self::default();
        }

        let (wins, losses): (Vec<&Trade>, Vec<&Trade>) = trades.iter().partition(|t| t.is_win());
        let returns: Vec<f64> = trades.iter().map(|t| t.pnl_percent_f64()).collect();

        let mean_pct = |ts: &[&Trade]| {
            if ts.is_empty() {
                0.0
            } else {
                ts.iter().map(|t| t.pnl_percent_f64()).sum::<f64>() / ts.len() as f64
            }
        };

        let gross_profit: Decimal = wins.iter().map(|t| t.pnl_usd).sum();
        let gross_loss: Decimal = losses.iter().map(|t| t.pnl_usd.abs()).sum();
        let profit_factor = if gross_loss > Decimal::ZERO {
            Some(gross_profit.to_f64().unwrap_or(0.0) / gross_loss.to_f64().unwrap_or(1.0))
        } else {
            None
        };

        let pnl_std_dev = if returns.len() > 1 { returns.iter().std_dev() } else { 0.0 };

        Self {
            total_trades: trades.len(),
            wins: wins.len(),
            losses: losses.len(),
            win_rate: wins.len() as f64 / trades.len() as f64 * 100.0,
            avg_win_percent: mean_pct(&wins),
            avg_loss_percent: mean_pct(&losses),
            profit_factor,
            total_pnl_usd: trades.iter().map(|t| t.pnl_usd).sum(),
            best_trade_percent: returns.iter().copied().fold(f64::MIN, f64::max),
            worst_trade_percent: returns.iter().copied().fold(f64::MAX, f64::min),
            avg_hold_hours: trades.iter().map(|t| t.hold_hours()).sum::<f64>() / trades.len() as f64,
            pnl_std_dev,
        }
    }
}

impl std::fmt::Display for PerformanceSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Performance ===")?;
        writeln!(f, "Trades:           {} ({} W / {} L)", self.total_trades, self.wins, self.losses)?;
        writeln!(f, "Win Rate:         {:.1}%", self.win_rate)?;
        writeln!(f, "Avg Win:          {:+.2}%", self.avg_win_percent)?;
        writeln!(f, "Avg Loss:         {:+.2}%", self.avg_loss_percent)?;
        match self.profit_factor {
            Some(pf) => writeln!(f, "Profit Factor:    {:.2}", pf)?,
            None => writeln!(f, "Profit Factor:    n/a")?,
        }
        writeln!(f, "Total P&L:        ${:.2}", self.total_pnl_usd)?;
        writeln!(f, "Best / Worst:     {:+.1}% / {:+.1}%", self.best_trade_percent, self.worst_trade_percent)?;
        writeln!(f, "Avg Hold:         {:.1}h", self.avg_hold_hours)?;
        write!(f, "P&L Std Dev:      {:.2}%", self.pnl_std_dev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExitReason, Position};
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;

    fn trade(sell: Decimal, hours: i64) -> Trade {
        let mut pos = Position::open("FOO", "mintF", "dex", dec!(100), dec!(1));
        pos.open_time = Utc::now() - Duration::hours(hours);
        Trade::from_close(&pos, sell, Utc::now(), ExitReason::Manual, "")
    }

    #[test]
    fn test_empty_history() {
        let summary = PerformanceSummary::from_trades(&[]);
        assert_eq!(summary.total_trades, 0);
        assert_eq!(summary.profit_factor, None);
    }

    #[test]
    fn test_summary() {
        let trades = vec![trade(dec!(1.20), 2), trade(dec!(1.10), 4), trade(dec!(0.90), 6)];
        let summary = PerformanceSummary::from_trades(&trades);

        assert_eq!(summary.total_trades, 3);
        assert_eq!(summary.wins, 2);
        assert_eq!(summary.total_pnl_usd, dec!(20));
        assert!((summary.avg_win_percent - 15.0).abs() < 1e-9);
        assert!((summary.avg_loss_percent + 10.0).abs() < 1e-9);
        // 30 profit / 10 loss
        assert!((summary.profit_factor.unwrap() - 3.0).abs() < 1e-9);
        assert_eq!(summary.best_trade_percent, 20.0);
        assert_eq!(summary.worst_trade_percent, -10.0);
        assert!((summary.avg_hold_hours - 4.0).abs() < 0.01);
        assert!(summary.pnl_std_dev > 0.0);
    }
}

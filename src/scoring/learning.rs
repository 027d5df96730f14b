//! Win/loss tallies learned from trade history.

use std::collections::{BTreeMap, HashMap};

use chrono::Timelike;
use serde::Serialize;

use super::factors::{FactorMap, DEFAULT_WEIGHTS};
use crate::models::Trade;

/// Samples needed before a tally influences scoring.
pub const MIN_SAMPLES: u32 = 3;

/// Trades needed before learning replaces the current tallies.
pub const MIN_HISTORY: usize = 10;

/// Trades read per learning pass.
pub const HISTORY_WINDOW: i64 = 500;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WinLoss {
    pub wins: u32,
    pub losses: u32,
    /// Sum of realized pnl percent
    pub total_pnl_percent: f64,
}

impl WinLoss {
    pub fn record(&mut self, trade: &Trade) {
        if trade.is_win() {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
        self.total_pnl_percent += trade.pnl_percent_f64();
    }

    pub fn total(&self) -> u32 {
        self.wins + self.losses
    }

    pub fn win_rate(&self) -> Option<f64> {
        match self.total() {
            0 => None,
            n => Some(self.wins as f64 / n as f64),
        }
    }

    /// Win rate once the tally has at least [`MIN_SAMPLES`] trades.
    pub fn reliable_win_rate(&self) -> Option<f64> {
        if self.total() < MIN_SAMPLES {
            None
        } else {
            self.win_rate()
        }
    }
}

/// Learned per-source and per-UTC-hour tallies.
#[derive(Debug, Clone, Default)]
pub struct LearnedStats {
    pub by_source: HashMap<String, WinLoss>,
    pub by_hour: [WinLoss; 24],
    pub trades_seen: usize,
}

impl LearnedStats {
    /// Rebuild tallies from trades. Hours are taken from the entry time.
    pub fn from_trades(trades: &[Trade]) -> Self {
        let mut stats = LearnedStats {
            trades_seen: trades.len(),
            ..Default::default()
        };
        for trade in trades {
            let source = if trade.source.is_empty() { "unknown" } else { trade.source.as_str() };
            stats.by_source.entry(source.to_string()).or_default().record(trade);
            stats.by_hour[trade.buy_time.hour() as usize].record(trade);
        }
        stats
    }

    /// 0.5 + win rate, or 1.0 without enough samples.
    pub fn source_multiplier(&self, source: &str) -> f64 {
        self.by_source
            .get(source)
            .and_then(WinLoss::reliable_win_rate)
            .map(|wr| 0.5 + wr)
            .unwrap_or(1.0)
    }

    /// 0.7 + 0.6 × win rate, or 1.0 without enough samples.
    pub fn hour_multiplier(&self, hour: u32) -> f64 {
        self.by_hour
            .get(hour as usize)
            .and_then(WinLoss::reliable_win_rate)
            .map(|wr| 0.7 + 0.6 * wr)
            .unwrap_or(1.0)
    }

    pub fn insights(&self) -> Insights {
        let source_stats: BTreeMap<String, SourceStats> = self
            .by_source
            .iter()
            .filter(|(_, wl)| wl.total() > 0)
            .map(|(source, wl)| {
                let total = wl.total();
                (
                    source.clone(),
                    SourceStats {
                        win_rate: round1(wl.wins as f64 / total as f64 * 100.0),
                        total_trades: total,
                        avg_pnl_percent: (wl.total_pnl_percent / total as f64 * 100.0).round() / 100.0,
                    },
                )
            })
            .collect();

        // BTreeMap order breaks ties alphabetically
        let best_source = source_stats
            .iter()
            .fold(None::<(&String, f64)>, |best, (s, st)| match best {
                Some((_, wr)) if wr >= st.win_rate => best,
                _ => Some((s, st.win_rate)),
            })
            .map(|(s, _)| s.clone());
        let worst_source = source_stats
            .iter()
            .fold(None::<(&String, f64)>, |worst, (s, st)| match worst {
                Some((_, wr)) if wr <= st.win_rate => worst,
                _ => Some((s, st.win_rate)),
            })
            .map(|(s, _)| s.clone());

        let best_hours_utc = self
            .by_hour
            .iter()
            .enumerate()
            .filter(|(_, wl)| wl.total() >= MIN_SAMPLES && wl.win_rate().unwrap_or(0.0) > 0.6)
            .map(|(hour, _)| hour as u32)
            .collect();

        Insights {
            trades_analyzed: self.trades_seen,
            source_stats,
            best_source,
            worst_source,
            best_hours_utc,
            weights: DEFAULT_WEIGHTS,
        }
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceStats {
    /// Percent
    pub win_rate: f64,
    pub total_trades: u32,
    pub avg_pnl_percent: f64,
}

/// Learning insights for the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct Insights {
    pub trades_analyzed: usize,
    pub source_stats: BTreeMap<String, SourceStats>,
    pub best_source: Option<String>,
    pub worst_source: Option<String>,
    pub best_hours_utc: Vec<u32>,
    pub weights: FactorMap,
}

impl std::fmt::Display for Insights {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Learning Insights ===")?;
        writeln!(f, "Trades analyzed:  {}", self.trades_analyzed)?;
        writeln!(f, "Best source:      {}", self.best_source.as_deref().unwrap_or("-"))?;
        writeln!(f, "Worst source:     {}", self.worst_source.as_deref().unwrap_or("-"))?;
        let hours: Vec<String> = self.best_hours_utc.iter().map(|h| format!("{:02}:00", h)).collect();
        writeln!(
            f,
            "Best hours (UTC): {}",
            if hours.is_empty() { "-".to_string() } else { hours.join(", ") }
        )?;

        if !self.source_stats.is_empty() {
            writeln!(f, "\n{:<20} {:>8} {:>8} {:>10}", "SOURCE", "TRADES", "WIN%", "AVG PNL%")?;
            for (source, stats) in &self.source_stats {
                writeln!(
                    f,
                    "{:<20} {:>8} {:>7.1}% {:>9.2}%",
                    source, stats.total_trades, stats.win_rate, stats.avg_pnl_percent
                )?;
            }
        }

        writeln!(f, "\nFactor weights:")?;
        for (factor, weight) in self.weights.iter() {
            writeln!(f, "  {:<18} {:.2}", factor.name(), weight)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExitReason, Position};
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn trade(source: &str, hour: u32, sell: Decimal) -> Trade {
        let mut pos = Position::open("FOO", "mintF", source, dec!(10), dec!(1));
        pos.open_time = Utc.with_ymd_and_hms(2026, 3, 2, hour, 15, 0).unwrap();
        let sell_time = pos.open_time + chrono::Duration::hours(1);
        Trade::from_close(&pos, sell, sell_time, ExitReason::TakeProfit, "")
    }

    #[test]
    fn test_multipliers_need_three_samples() {
        let stats = LearnedStats::from_trades(&[trade("dex", 9, dec!(1.2)), trade("dex", 9, dec!(1.1))]);
        assert_eq!(stats.source_multiplier("dex"), 1.0);
        assert_eq!(stats.hour_multiplier(9), 1.0);
        assert_eq!(stats.source_multiplier("missing"), 1.0);
    }

    #[test]
    fn test_multipliers_from_win_rate() {
        let stats = LearnedStats::from_trades(&[
            trade("dex", 9, dec!(1.2)),
            trade("dex", 9, dec!(1.1)),
            trade("dex", 9, dec!(0.9)),
            trade("dex", 9, dec!(1.5)),
        ]);
        // 3/4 wins
        assert!((stats.source_multiplier("dex") - 1.25).abs() < 1e-9);
        assert!((stats.hour_multiplier(9) - (0.7 + 0.6 * 0.75)).abs() < 1e-9);
        assert_eq!(stats.hour_multiplier(10), 1.0);
    }

    #[test]
    fn test_insights_best_and_worst() {
        let stats = LearnedStats::from_trades(&[
            trade("dex", 9, dec!(1.2)),
            trade("dex", 9, dec!(1.3)),
            trade("dex", 9, dec!(1.1)),
            trade("gecko", 14, dec!(0.9)),
            trade("gecko", 14, dec!(1.1)),
        ]);
        let insights = stats.insights();
        assert_eq!(insights.best_source.as_deref(), Some("dex"));
        assert_eq!(insights.worst_source.as_deref(), Some("gecko"));
        assert_eq!(insights.best_hours_utc, vec![9]);
        assert_eq!(insights.source_stats["gecko"].win_rate, 50.0);
        assert_eq!(insights.source_stats["dex"].total_trades, 3);
    }
}

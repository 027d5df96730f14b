//! Completed trade: the immutable realized result of closing a position.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::Position;

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    TrailingStop,
    Advisory,
    Manual,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "take_profit",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::Advisory => "advisory",
            ExitReason::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "take_profit" => ExitReason::TakeProfit,
            "stop_loss" => ExitReason::StopLoss,
            "trailing_stop" => ExitReason::TrailingStop,
            "advisory" => ExitReason::Advisory,
            _ => ExitReason::Manual,
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Realized trade record. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub asset_id: String,

    /// Signal source of the entry
    #[serde(default)]
    pub source: String,

    pub quantity: Decimal,
    pub buy_price: Decimal,
    pub sell_price: Decimal,

    /// (sell_price - buy_price) * quantity, exact
    pub pnl_usd: Decimal,

    /// Realized return in percent
    pub pnl_percent: Decimal,

    /// Holding time in seconds
    pub hold_secs: i64,

    pub buy_time: DateTime<Utc>,
    pub sell_time: DateTime<Utc>,

    pub exit_reason: ExitReason,

    /// Human-readable trigger detail
    #[serde(default)]
    pub exit_detail: String,
}

impl Trade {
    /// Realize a position at `sell_price`.
    pub fn from_close(
        position: &Position,
        sell_price: Decimal,
        sell_time: DateTime<Utc>,
        exit_reason: ExitReason,
        exit_detail: impl Into<String>,
    ) -> Self {
        let pnl_usd = (sell_price - position.buy_price) * position.quantity;
        let pnl_percent = if position.buy_price.is_zero() {
            Decimal::ZERO
        } else {
            (sell_price - position.buy_price) / position.buy_price * dec!(100)
        };

        Self {
            asset_id: position.asset_id.clone(),
            source: position.source.clone(),
            quantity: position.quantity,
            buy_price: position.buy_price,
            sell_price,
            pnl_usd,
            pnl_percent,
            hold_secs: (sell_time - position.open_time).num_seconds().max(0),
            buy_time: position.open_time,
            sell_time,
            exit_reason,
            exit_detail: exit_detail.into(),
        }
    }

    pub fn hold_duration(&self) -> Duration {
        Duration::seconds(self.hold_secs)
    }

    pub fn hold_hours(&self) -> f64 {
        self.hold_secs as f64 / 3600.0
    }

    /// A trade counts as a win when it realized a positive return.
    pub fn is_win(&self) -> bool {
        self.pnl_percent > Decimal::ZERO
    }

    pub fn pnl_percent_f64(&self) -> f64 {
        self.pnl_percent.to_f64().unwrap_or(0.0)
    }
}

//! Position model: a quantity of an asset held since a recorded entry.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Position status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Open,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "OPEN",
            PositionStatus::Closed => "CLOSED",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("CLOSED") {
            PositionStatus::Closed
        } else {
            PositionStatus::Open
        }
    }
}

/// A held (or previously held) position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Asset symbol
    pub asset_id: String,

    /// Contract / mint used for routing orders
    pub contract_ref: String,

    /// Signal source that led to the entry (used for learning)
    #[serde(default)]
    pub source: String,

    /// Number of tokens held
    pub quantity: Decimal,

    /// Entry price per token in USD
    pub buy_price: Decimal,

    pub open_time: DateTime<Utc>,

    pub status: PositionStatus,

    /// Highest pnl percent observed while open; only ever raised
    #[serde(default)]
    pub peak_pnl_percent: Decimal,
}

impl Position {
    /// Create a new OPEN position.
    pub fn open(
        asset_id: impl Into<String>,
        contract_ref: impl Into<String>,
        source: impl Into<String>,
        quantity: Decimal,
        buy_price: Decimal,
    ) -> Self {
        Self {
            asset_id: asset_id.into(),
            contract_ref: contract_ref.into(),
            source: source.into(),
            quantity,
            buy_price,
            open_time: Utc::now(),
            status: PositionStatus::Open,
            peak_pnl_percent: Decimal::ZERO,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Cost basis in USD.
    pub fn cost_basis(&self) -> Decimal {
        self.quantity * self.buy_price
    }

    /// Mark-to-market value at the given price.
    pub fn market_value(&self, price: Decimal) -> Decimal {
        self.quantity * price
    }

    /// Unrealized pnl in percent (e.g. 12.5 for +12.5%).
    pub fn pnl_percent(&self, current_price: Decimal) -> Decimal {
        if self.buy_price.is_zero() {
            return Decimal::ZERO;
        }
        (current_price - self.buy_price) / self.buy_price * dec!(100)
    }

    /// Raise the recorded peak if `pnl_percent` exceeds it. Returns true when raised.
    pub fn raise_peak(&mut self, pnl_percent: Decimal) -> bool {
        if pnl_percent > self.peak_pnl_percent {
            self.peak_pnl_percent = pnl_percent;
            true
        } else {
            false
        }
    }

    pub fn held_for(&self) -> Duration {
        Utc::now() - self.open_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_pnl() {
        let pos = Position::open("FOO", "mintF", "dex_boosted", dec!(150), dec!(1.00));
        assert_eq!(pos.cost_basis(), dec!(150));
        assert_eq!(pos.pnl_percent(dec!(0.84)), dec!(-16));
        assert_eq!(pos.pnl_percent(dec!(1.80)), dec!(80));
        assert_eq!(pos.market_value(dec!(2)), dec!(300));
    }

    #[test]
    fn test_peak_only_rises() {
        let mut pos = Position::open("FOO", "mintF", "dex_boosted", dec!(10), dec!(1));
        assert!(pos.raise_peak(dec!(30)));
        assert!(!pos.raise_peak(dec!(12)));
        assert_eq!(pos.peak_pnl_percent, dec!(30));
        assert!(pos.raise_peak(dec!(31.5)));
        assert_eq!(pos.peak_pnl_percent, dec!(31.5));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(PositionStatus::parse("CLOSED"), PositionStatus::Closed);
        assert_eq!(PositionStatus::parse("OPEN"), PositionStatus::Open);
        assert_eq!(PositionStatus::Open.as_str(), "OPEN");
    }
}

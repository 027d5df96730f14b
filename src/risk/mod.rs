//! Portfolio health circuit breaker.
//!
//! The gate tracks the running peak of (stable balance + open positions) and
//! decides whether new entries should pause. It never blocks exits.

mod performance;

pub use performance::PerformanceSummary;

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Reserve below this pauses trading (fees cannot be paid).
pub const RESERVE_FLOOR: f64 = 0.01;
/// Reserve below this raises a warning only.
pub const RESERVE_WARNING: f64 = 0.05;

pub const PAUSE_DRAWDOWN_PERCENT: Decimal = dec!(25);
pub const WARN_DRAWDOWN_PERCENT: Decimal = dec!(15);

const ALERT_COOLDOWN_SECS: i64 = 3600;

/// Account balances.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Balances {
    /// Fee/gas reserve asset (SOL)
    pub reserve: f64,
    /// Stable asset (USDC)
    pub stable: Decimal,
}

/// Process-wide risk state.
#[derive(Debug, Clone, Default)]
pub struct RiskState {
    pub peak_portfolio_value: Decimal,
    pub last_alert_time: Option<DateTime<Utc>>,
}

/// Result of a health check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub warnings: Vec<String>,
    pub should_pause_trading: bool,
    pub total_value: Decimal,
    pub peak_value: Decimal,
    pub drawdown_percent: Decimal,
    /// Warnings should be sent as an alert (throttled to once per hour)
    pub alert: bool,
}

#[derive(Debug, Default)]
pub struct RiskGate {
    state: Mutex<RiskState>,
}

impl RiskGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RiskState {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn check(&self, balances: &Balances, positions_value: Decimal, min_position_usd: Decimal) -> HealthReport {
        self.check_at(balances, positions_value, min_position_usd, Utc::now())
    }

    pub fn check_at(
        &self,
        balances: &Balances,
        positions_value: Decimal,
        min_position_usd: Decimal,
        now: DateTime<Utc>,
    ) -> HealthReport {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());

        let total_value = balances.stable + positions_value;
        if total_value > state.peak_portfolio_value {
            state.peak_portfolio_value = total_value;
        }
        let peak = state.peak_portfolio_value;

        let mut warnings = Vec::new();
        let mut should_pause = false;

        if balances.reserve < RESERVE_FLOOR {
            warnings.push(format!("LOW GAS: {:.4} SOL, trades may fail", balances.reserve));
            should_pause = true;
        } else if balances.reserve < RESERVE_WARNING {
            warnings.push(format!("gas getting low: {:.3} SOL", balances.reserve));
        }

        let drawdown = if peak > Decimal::ZERO {
            (peak - total_value) / peak * dec!(100)
        } else {
            Decimal::ZERO
        };
        if drawdown >= PAUSE_DRAWDOWN_PERCENT {
            warnings.push(format!("max drawdown: -{:.0}% from peak ${:.2}", drawdown, peak));
            should_pause = true;
        } else if drawdown >= WARN_DRAWDOWN_PERCENT {
            warnings.push(format!("drawdown: -{:.0}% from peak", drawdown));
        }

        if balances.stable < min_position_usd {
            warnings.push(format!("low USDC: ${:.2}, cannot open new positions", balances.stable));
        }

        let alert = !warnings.is_empty()
            && state
                .last_alert_time
                .map_or(true, |t| now - t >= Duration::seconds(ALERT_COOLDOWN_SECS));
        if alert {
            state.last_alert_time = Some(now);
            for w in &warnings {
                warn!(alert = %w, "Portfolio health");
            }
        }

        HealthReport {
            healthy: warnings.is_empty(),
            warnings,
            should_pause_trading: should_pause,
            total_value,
            peak_value: peak,
            drawdown_percent: drawdown,
            alert,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balances(reserve: f64, stable: Decimal) -> Balances {
        Balances { reserve, stable }
    }

    #[test]
    fn test_healthy_portfolio() {
        let gate = RiskGate::new();
        let report = gate.check(&balances(0.5, dec!(400)), dec!(100), dec!(20));
        assert!(report.healthy);
        assert!(!report.should_pause_trading);
        assert_eq!(report.total_value, dec!(500));
        assert_eq!(report.peak_value, dec!(500));
        assert_eq!(report.drawdown_percent, Decimal::ZERO);
    }

    #[test]
    fn test_low_reserve_pauses() {
        let gate = RiskGate::new();
        let report = gate.check(&balances(0.005, dec!(400)), dec!(0), dec!(20));
        assert!(report.should_pause_trading);
        assert!(report.warnings[0].contains("LOW GAS"));

        let report = gate.check(&balances(0.03, dec!(400)), dec!(0), dec!(20));
        assert!(!report.should_pause_trading);
        assert!(!report.healthy);
    }

    #[test]
    fn test_max_drawdown_pauses() {
        let gate = RiskGate::new();
        gate.check(&balances(1.0, dec!(1000)), dec!(0), dec!(20));

        let report = gate.check(&balances(1.0, dec!(500)), dec!(200), dec!(20));
        assert_eq!(report.drawdown_percent, dec!(30));
        assert!(report.should_pause_trading);
        assert!(report.warnings.iter().any(|w| w.contains("max drawdown")));
        assert_eq!(report.peak_value, dec!(1000));
    }

    #[test]
    fn test_moderate_drawdown_warns_only() {
        let gate = RiskGate::new();
        gate.check(&balances(1.0, dec!(1000)), dec!(0), dec!(20));

        let report = gate.check(&balances(1.0, dec!(800)), dec!(0), dec!(20));
        assert!(!report.should_pause_trading);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].starts_with("drawdown"));
    }

    #[test]
    fn test_low_stable_warns_without_pausing() {
        let gate = RiskGate::new();
        let report = gate.check(&balances(1.0, dec!(5)), dec!(300), dec!(20));
        assert!(!report.should_pause_trading);
        assert!(report.warnings[0].contains("cannot open new positions"));
    }

    #[test]
    fn test_alerts_throttled_hourly() {
        let gate = RiskGate::new();
        let t0 = Utc::now();
        let low = balances(0.001, dec!(100));

        assert!(gate.check_at(&low, dec!(0), dec!(20), t0).alert);
        assert!(!gate.check_at(&low, dec!(0), dec!(20), t0 + Duration::minutes(30)).alert);
        assert!(gate.check_at(&low, dec!(0), dec!(20), t0 + Duration::minutes(61)).alert);
    }
}

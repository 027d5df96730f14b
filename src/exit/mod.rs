//! Exit policy for open positions.
//!
//! Triggers are evaluated in a fixed order and the first one that fires is
//! returned: take-profit, stop-loss, trailing stop, advisory.

mod advisor;

pub use advisor::{
    fallback_advice, Advice, Advisor, AdvisorError, AdvisoryInput, ExitUrgency, HttpAdvisor, NoopAdvisor,
};

use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info, warn};

use crate::config::TradingConfig;
use crate::models::{ExitReason, Position, TokenData};

/// Trailing stop level (in pnl percent) for a given pnl.
///
/// Below 0 the stop is a fixed -15%; above it the stop trails by a gap that
/// widens as gains grow.
pub fn trailing_stop_level(pnl_percent: Decimal) -> Decimal {
    if pnl_percent < Decimal::ZERO {
        dec!(-15)
    } else if pnl_percent < dec!(20) {
        pnl_percent - dec!(10)
    } else if pnl_percent < dec!(50) {
        pnl_percent - dec!(15)
    } else if pnl_percent < dec!(100) {
        pnl_percent - dec!(20)
    } else {
        pnl_percent - dec!(25)
    }
}

/// Sell recommendation.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitSignal {
    pub reason: ExitReason,
    pub urgency: ExitUrgency,
    pub detail: String,
}

/// Outcome of evaluating one position at one price.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitEvaluation {
    pub price: Decimal,
    pub pnl_percent: Decimal,
    /// Peak after this evaluation (never below the position's previous peak)
    pub peak_pnl_percent: Decimal,
    pub signal: Option<ExitSignal>,
}

impl ExitEvaluation {
    pub fn should_sell(&self) -> bool {
        self.signal.is_some()
    }

    pub fn peak_raised(&self, position: &Position) -> bool {
        self.peak_pnl_percent > position.peak_pnl_percent
    }
}

pub struct ExitEvaluator {
    advisor: Arc<dyn Advisor>,
}

impl ExitEvaluator {
    pub fn new(advisor: Arc<dyn Advisor>) -> Self {
        Self { advisor }
    }

    /// Evaluate a position against live market data.
    pub async fn evaluate(&self, position: &Position, data: &TokenData, config: &TradingConfig) -> ExitEvaluation {
        let price = data.price;
        let pnl = position.pnl_percent(price);
        let peak = position.peak_pnl_percent.max(pnl);

        let signal = match Self::check_fixed(position, pnl, config).or_else(|| Self::check_trailing(position, pnl, peak)) {
            Some(signal) => Some(signal),
            None => self.check_advisory(position, data, pnl).await,
        };

        ExitEvaluation {
            price,
            pnl_percent: pnl,
            peak_pnl_percent: peak,
            signal,
        }
    }

    fn check_fixed(position: &Position, pnl: Decimal, config: &TradingConfig) -> Option<ExitSignal> {
        if pnl >= config.take_profit_percent {
            info!(
                asset = %position.asset_id,
                pnl = %pnl.round_dp(2),
                target = %config.take_profit_percent,
                "Take profit triggered"
            );
            return Some(ExitSignal {
                reason: ExitReason::TakeProfit,
                urgency: ExitUrgency::Medium,
                detail: format!("take profit at {:+.1}%", pnl),
            });
        }

        if pnl <= -config.stop_loss_percent {
            warn!(
                asset = %position.asset_id,
                pnl = %pnl.round_dp(2),
                stop = %config.stop_loss_percent,
                "Stop loss triggered"
            );
            return Some(ExitSignal {
                reason: ExitReason::StopLoss,
                urgency: ExitUrgency::High,
                detail: format!("stop loss at {:+.1}%", pnl),
            });
        }

        None
    }

    /// The stop trails the peak once the position has been in profit;
    /// before that it is taken from the live pnl, which gives the -15% floor.
    fn check_trailing(position: &Position, pnl: Decimal, peak: Decimal) -> Option<ExitSignal> {
        let level = if peak > Decimal::ZERO {
            trailing_stop_level(peak)
        } else {
            trailing_stop_level(pnl)
        };
        if pnl > level {
            return None;
        }
        info!(
            asset = %position.asset_id,
            pnl = %pnl.round_dp(2),
            peak = %peak.round_dp(2),
            level = %level.round_dp(2),
            "Trailing stop triggered"
        );
        Some(ExitSignal {
            reason: ExitReason::TrailingStop,
            urgency: ExitUrgency::High,
            detail: format!("trailing stop {:+.1}% (peak {:+.1}%)", level, peak),
        })
    }

    async fn check_advisory(&self, position: &Position, data: &TokenData, pnl: Decimal) -> Option<ExitSignal> {
        let input = AdvisoryInput {
            asset_id: position.asset_id.clone(),
            buy_price: position.buy_price.to_f64().unwrap_or(0.0),
            current_price: data.price.to_f64().unwrap_or(0.0),
            pnl_percent: pnl.to_f64().unwrap_or(0.0),
            hold_hours: position.held_for().num_minutes() as f64 / 60.0,
            volume_24h: data.volume_24h,
            liquidity: data.liquidity,
            change_1h: data.change_1h,
            change_24h: data.change_24h,
        };

        let advice = match self.advisor.evaluate(&input).await {
            Ok(advice) => advice,
            Err(e) => {
                debug!(asset = %position.asset_id, error = %e, "Advisor unavailable, using fallback");
                fallback_advice(input.pnl_percent, input.change_1h)
            }
        };

        if !advice.sell {
            return None;
        }
        info!(asset = %position.asset_id, reason = %advice.reason, urgency = ?advice.urgency, "Advisory exit");
        Some(ExitSignal {
            reason: ExitReason::Advisory,
            urgency: advice.urgency,
            detail: advice.reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Advisor that counts calls and always returns the same verdict.
    struct CountingAdvisor {
        calls: AtomicUsize,
        verdict: Option<Advice>,
    }

    impl CountingAdvisor {
        fn new(verdict: Option<Advice>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                verdict,
            })
        }
    }

    #[async_trait]
    impl Advisor for CountingAdvisor {
        async fn evaluate(&self, _input: &AdvisoryInput) -> Result<Advice, AdvisorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.verdict.clone().ok_or_else(|| AdvisorError::Request("unreachable".into()))
        }
    }

    fn position(peak: Decimal) -> Position {
        let mut pos = Position::open("FOO", "mintF", "dex_boosted", dec!(150), dec!(1.00));
        pos.peak_pnl_percent = peak;
        pos
    }

    fn market(price: Decimal, change_1h: f64) -> TokenData {
        TokenData {
            price,
            change_1h,
            ..Default::default()
        }
    }

    fn hold() -> Option<Advice> {
        Some(Advice {
            sell: false,
            reason: "hold".into(),
            urgency: ExitUrgency::Low,
        })
    }

    #[test]
    fn test_trailing_stop_table() {
        assert_eq!(trailing_stop_level(dec!(80)), dec!(60));
        assert_eq!(trailing_stop_level(dec!(10)), dec!(0));
        assert_eq!(trailing_stop_level(dec!(-5)), dec!(-15));
        assert_eq!(trailing_stop_level(dec!(0)), dec!(-10));
        assert_eq!(trailing_stop_level(dec!(30)), dec!(15));
        assert_eq!(trailing_stop_level(dec!(150)), dec!(125));
    }

    #[tokio::test]
    async fn test_stop_loss_wins_before_trailing() {
        let advisor = CountingAdvisor::new(hold());
        let evaluator = ExitEvaluator::new(advisor.clone());
        let config = TradingConfig::default();

        let eval = evaluator.evaluate(&position(dec!(0)), &market(dec!(0.84), 0.0), &config).await;
        assert_eq!(eval.pnl_percent, dec!(-16));
        let signal = eval.signal.unwrap();
        assert_eq!(signal.reason, ExitReason::StopLoss);
        assert_eq!(advisor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_take_profit() {
        let evaluator = ExitEvaluator::new(CountingAdvisor::new(hold()));
        let eval = evaluator
            .evaluate(&position(dec!(0)), &market(dec!(1.15), 0.0), &TradingConfig::default())
            .await;
        assert_eq!(eval.signal.unwrap().reason, ExitReason::TakeProfit);
        assert_eq!(eval.peak_pnl_percent, dec!(15));
    }

    #[tokio::test]
    async fn test_trailing_stop_from_peak() {
        let evaluator = ExitEvaluator::new(CountingAdvisor::new(hold()));
        let config = TradingConfig {
            take_profit_percent: dec!(500),
            ..Default::default()
        };

        // Peak 80 puts the stop at 60
        let eval = evaluator.evaluate(&position(dec!(80)), &market(dec!(1.65), 0.0), &config).await;
        assert!(!eval.should_sell());
        assert_eq!(eval.peak_pnl_percent, dec!(80));

        let eval = evaluator.evaluate(&position(dec!(80)), &market(dec!(1.60), 0.0), &config).await;
        assert_eq!(eval.signal.unwrap().reason, ExitReason::TrailingStop);
    }

    #[tokio::test]
    async fn test_loss_floor_before_any_profit() {
        let evaluator = ExitEvaluator::new(CountingAdvisor::new(hold()));
        let config = TradingConfig {
            stop_loss_percent: dec!(12),
            ..Default::default()
        };

        // Never in profit: -11% is above both the stop loss and the -15% floor
        let eval = evaluator.evaluate(&position(dec!(0)), &market(dec!(0.89), 0.0), &config).await;
        assert_eq!(eval.pnl_percent, dec!(-11));
        assert!(!eval.should_sell());
        assert_eq!(eval.peak_pnl_percent, dec!(0));

        let config = TradingConfig {
            stop_loss_percent: dec!(20),
            ..Default::default()
        };
        let eval = evaluator.evaluate(&position(dec!(0)), &market(dec!(0.85), 0.0), &config).await;
        let signal = eval.signal.unwrap();
        assert_eq!(signal.reason, ExitReason::TrailingStop);
        assert!(signal.detail.contains("-15"));
    }

    #[tokio::test]
    async fn test_peak_is_monotonic() {
        let evaluator = ExitEvaluator::new(CountingAdvisor::new(hold()));
        let pos = position(dec!(12));

        let eval = evaluator.evaluate(&pos, &market(dec!(1.05), 0.0), &TradingConfig::default()).await;
        assert_eq!(eval.peak_pnl_percent, dec!(12));
        assert!(!eval.peak_raised(&pos));

        let eval = evaluator.evaluate(&pos, &market(dec!(1.14), 0.0), &TradingConfig::default()).await;
        assert_eq!(eval.peak_pnl_percent, dec!(14));
        assert!(eval.peak_raised(&pos));
    }

    #[tokio::test]
    async fn test_advisory_failure_uses_fallback() {
        let advisor = CountingAdvisor::new(None);
        let evaluator = ExitEvaluator::new(advisor.clone());
        let config = TradingConfig {
            take_profit_percent: dec!(500),
            ..Default::default()
        };

        // +60% with a fading hour; peak 60 puts the trailing stop at 40
        let eval = evaluator.evaluate(&position(dec!(60)), &market(dec!(1.60), -8.0), &config).await;
        let signal = eval.signal.unwrap();
        assert_eq!(signal.reason, ExitReason::Advisory);
        assert_eq!(signal.urgency, ExitUrgency::Medium);
        assert_eq!(advisor.calls.load(Ordering::SeqCst), 1);

        let eval = evaluator.evaluate(&position(dec!(60)), &market(dec!(1.60), 3.0), &config).await;
        assert!(!eval.should_sell());
    }

    #[tokio::test]
    async fn test_advisory_sell_verdict() {
        let advisor = CountingAdvisor::new(Some(Advice {
            sell: true,
            reason: "liquidity draining".into(),
            urgency: ExitUrgency::High,
        }));
        let evaluator = ExitEvaluator::new(advisor);

        let eval = evaluator
            .evaluate(&position(dec!(0)), &market(dec!(1.02), 0.0), &TradingConfig::default())
            .await;
        let signal = eval.signal.unwrap();
        assert_eq!(signal.reason, ExitReason::Advisory);
        assert_eq!(signal.detail, "liquidity draining");
    }
}

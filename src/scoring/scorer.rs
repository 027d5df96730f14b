//! Multi-factor opportunity scorer with learned source/hour multipliers.

use std::sync::RwLock;

use chrono::{Timelike, Utc};
use serde::Serialize;
use tracing::{debug, info};

use super::factors::{Factor, FactorMap, DEFAULT_WEIGHTS};
use super::learning::{Insights, LearnedStats, HISTORY_WINDOW, MIN_HISTORY};
use crate::db::PositionStore;
use crate::error::TradeResult;
use crate::models::{MarketSnapshot, Signal};

/// Adjusted score needed for a BUY recommendation.
pub const BUY_THRESHOLD: f64 = 50.0;
const HIGH_CONFIDENCE: f64 = 70.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn from_score(score: f64) -> Self {
        if score >= HIGH_CONFIDENCE {
            Confidence::High
        } else if score >= BUY_THRESHOLD {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "LOW",
            Confidence::Medium => "MEDIUM",
            Confidence::High => "HIGH",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Recommendation {
    Buy,
    Skip,
}

/// Result of scoring one signal. Transient.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredOpportunity {
    pub asset_id: String,
    pub source: String,
    /// Weighted total after multipliers
    pub total_score: f64,
    /// Weighted total before multipliers
    pub base_score: f64,
    pub confidence: Confidence,
    pub factor_scores: FactorMap,
    pub source_multiplier: f64,
    pub hour_multiplier: f64,
    pub recommendation: Recommendation,
    pub reasons: Vec<String>,
}

impl ScoredOpportunity {
    pub fn is_buy(&self) -> bool {
        self.recommendation == Recommendation::Buy
    }

    /// Up to four reasons joined for logs and audit.
    pub fn summary(&self) -> String {
        if self.reasons.is_empty() {
            return "general opportunity".to_string();
        }
        self.reasons.iter().take(4).cloned().collect::<Vec<_>>().join(" | ")
    }
}

/// Scores signals against fixed weights and learned multipliers.
#[derive(Debug, Default)]
pub struct OpportunityScorer {
    learned: RwLock<LearnedStats>,
}

impl OpportunityScorer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score at the current UTC hour.
    pub fn score_opportunity(&self, signal: &Signal, snapshot: &MarketSnapshot) -> ScoredOpportunity {
        self.score_at(signal, snapshot, Utc::now().hour())
    }

    /// Score with an explicit UTC hour for the hour multiplier.
    pub fn score_at(&self, signal: &Signal, snapshot: &MarketSnapshot, hour: u32) -> ScoredOpportunity {
        let factor_scores = FactorMap::score(snapshot);
        let base_score = factor_scores.weighted(&DEFAULT_WEIGHTS);

        let (source_multiplier, hour_multiplier) = {
            let learned = self.learned.read().unwrap_or_else(|p| p.into_inner());
            (learned.source_multiplier(&signal.source), learned.hour_multiplier(hour))
        };

        let total_score = base_score * source_multiplier * hour_multiplier;
        let mut reasons = factor_reasons(&factor_scores, snapshot);
        if source_multiplier > 1.1 {
            reasons.push(format!("{} historically profitable", signal.source));
        } else if source_multiplier < 0.8 {
            reasons.push(format!("{} historically weak", signal.source));
        }

        let recommendation = if total_score >= BUY_THRESHOLD {
            Recommendation::Buy
        } else {
            Recommendation::Skip
        };

        debug!(
            asset = %signal.asset_id,
            base = base_score,
            total = total_score,
            source_mult = source_multiplier,
            hour_mult = hour_multiplier,
            "Scored opportunity"
        );

        ScoredOpportunity {
            asset_id: signal.asset_id.clone(),
            source: signal.source.clone(),
            total_score,
            base_score,
            confidence: Confidence::from_score(total_score),
            factor_scores,
            source_multiplier,
            hour_multiplier,
            recommendation,
            reasons,
        }
    }

    /// Recompute learned tallies from trade history.
    ///
    /// Returns the number of trades analyzed; 0 when history is too short,
    /// in which case the current tallies are left unchanged.
    pub async fn learn_from_history(&self, store: &dyn PositionStore) -> TradeResult<usize> {
        let trades = store.trade_history(HISTORY_WINDOW).await?;
        if trades.len() < MIN_HISTORY {
            debug!(trades = trades.len(), "Not enough trades to learn from yet");
            return Ok(0);
        }

        let stats = LearnedStats::from_trades(&trades);
        *self.learned.write().unwrap_or_else(|p| p.into_inner()) = stats;
        info!(trades = trades.len(), "Learned from trade history");
        Ok(trades.len())
    }

    pub fn insights(&self) -> Insights {
        self.learned.read().unwrap_or_else(|p| p.into_inner()).insights()
    }

    #[cfg(test)]
    pub(crate) fn set_learned(&self, stats: LearnedStats) {
        *self.learned.write().unwrap() = stats;
    }
}

/// Human-readable notes for the strongest factors.
fn factor_reasons(scores: &FactorMap, m: &MarketSnapshot) -> Vec<String> {
    let mut reasons = Vec::new();
    for (factor, score) in scores.iter() {
        let reason = match factor {
            Factor::Buzz if score >= 60.0 => Some(format!("buzz ({} mentions)", m.mentions)),
            Factor::MultiSource if score >= 60.0 => Some(format!("trending on {} sources", m.num_sources)),
            Factor::SocialVelocity if score >= 80.0 => Some(format!("breaking ({:.1}h old)", m.age_hours)),
            Factor::PriceMomentum if score >= 60.0 => Some(format!("momentum ({:+.1}% 1h)", m.change_1h)),
            Factor::VolumeSurge if score >= 70.0 => {
                let avg = m.volume_24h / 24.0;
                Some(format!("volume surge ({:.1}x normal)", m.volume_1h / avg))
            }
            Factor::LiquidityHealth if score >= 80.0 => Some(format!("liquidity ${:.0}k", m.liquidity / 1000.0)),
            Factor::BuyPressure if score >= 70.0 => Some(format!("buy pressure ({}/{})", m.buys_1h, m.sells_1h)),
            _ => None,
        };
        reasons.extend(reason);
    }
    reasons
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{ExitReason, Position, Trade};
    use crate::scoring::learning::WinLoss;
    use rust_decimal_macros::dec;

    fn snapshot() -> MarketSnapshot {
        MarketSnapshot {
            mentions: 320,
            num_sources: 2,
            age_hours: 4.0,
            change_5m: 8.0,
            change_1h: 15.0,
            change_24h: 40.0,
            volume_24h: 240_000.0,
            volume_1h: 20_000.0,
            liquidity: 150_000.0,
            buys_1h: 60,
            sells_1h: 40,
        }
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let scorer = OpportunityScorer::new();
        let signal = Signal::new("FOO", "mintF", "dex_boosted");

        let a = scorer.score_at(&signal, &snapshot(), 12);
        let b = scorer.score_at(&signal, &snapshot(), 12);
        assert_eq!(a.total_score, b.total_score);
        assert_eq!(a.confidence, b.confidence);
        assert_eq!(a.factor_scores, b.factor_scores);
    }

    #[test]
    fn test_weighted_total() {
        let scorer = OpportunityScorer::new();
        let signal = Signal::new("FOO", "mintF", "dex_boosted");
        let scored = scorer.score_at(&signal, &snapshot(), 12);

        // buzz 80, multi 60, velocity 80, momentum 100, volume 70,
        // liquidity 60, pressure 70, freshness 100
        let expected = 80.0 * 0.20
            + 60.0 * 0.10
            + 80.0 * 0.10
            + 100.0 * 0.15
            + 70.0 * 0.15
            + 60.0 * 0.10
            + 70.0 * 0.10
            + 100.0 * 0.10;
        assert!((scored.total_score - expected).abs() < 1e-9);
        assert_eq!(scored.confidence, Confidence::High);
        assert!(scored.is_buy());
        assert_eq!(scored.source_multiplier, 1.0);
        assert_eq!(scored.hour_multiplier, 1.0);
    }

    #[test]
    fn test_weak_signal_is_skipped() {
        let scorer = OpportunityScorer::new();
        let signal = Signal::new("MEH", "", "gecko_trending");
        let scored = scorer.score_at(&signal, &MarketSnapshot::default(), 3);
        assert_eq!(scored.recommendation, Recommendation::Skip);
        assert_eq!(scored.confidence, Confidence::Low);
    }

    #[test]
    fn test_learned_multipliers_scale_total() {
        let scorer = OpportunityScorer::new();
        let signal = Signal::new("FOO", "mintF", "dex_boosted");
        let base = scorer.score_at(&signal, &snapshot(), 12).total_score;

        let mut stats = LearnedStats::default();
        stats.by_source.insert(
            "dex_boosted".to_string(),
            WinLoss { wins: 0, losses: 4, total_pnl_percent: -40.0 },
        );
        stats.by_hour[12] = WinLoss { wins: 3, losses: 0, total_pnl_percent: 30.0 };
        scorer.set_learned(stats);

        let scored = scorer.score_at(&signal, &snapshot(), 12);
        assert_eq!(scored.source_multiplier, 0.5);
        assert!((scored.hour_multiplier - 1.3).abs() < 1e-9);
        assert!((scored.total_score - base * 0.5 * 1.3).abs() < 1e-9);
        assert!(scored.reasons.iter().any(|r| r.contains("historically weak")));
    }

    #[tokio::test]
    async fn test_learning_needs_ten_trades() {
        let store = MemoryStore::new();
        for i in 0..9 {
            let asset = format!("T{}", i);
            store.open(Position::open(asset.as_str(), "", "dex_boosted", dec!(1), dec!(1))).await.unwrap();
            store.close(&asset, dec!(1.5), ExitReason::TakeProfit, "").await.unwrap();
        }

        let scorer = OpportunityScorer::new();
        assert_eq!(scorer.learn_from_history(&store).await.unwrap(), 0);

        store.open(Position::open("T9", "", "dex_boosted", dec!(1), dec!(1))).await.unwrap();
        let trade: Option<Trade> = store.close("T9", dec!(1.5), ExitReason::TakeProfit, "").await.unwrap();
        assert!(trade.is_some());

        assert_eq!(scorer.learn_from_history(&store).await.unwrap(), 10);
        let insights = scorer.insights();
        assert_eq!(insights.source_stats["dex_boosted"].total_trades, 10);
    }
}

//! Position store: open/closed positions, realized trades, signal audit and
//! bot status.
//!
//! Two implementations share one contract: [`MemoryStore`] for paper runs and
//! tests, [`SqliteStore`] for durable state. The backend is picked once at
//! startup.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::TradeResult;
use crate::models::{BotStatus, ExitReason, Position, Trade};
use crate::scoring::ScoredOpportunity;

/// Raw signal audit retention.
pub const SIGNAL_RETENTION_DAYS: i64 = 7;

/// Audit record of one scored signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub asset_id: String,
    pub contract_ref: String,
    pub source: String,
    pub total_score: f64,
    pub confidence: String,
    pub recommendation: String,
    pub summary: String,
    pub recorded_at: DateTime<Utc>,
}

impl SignalRecord {
    pub fn from_scored(scored: &ScoredOpportunity, contract_ref: &str) -> Self {
        Self {
            asset_id: scored.asset_id.clone(),
            contract_ref: contract_ref.to_string(),
            source: scored.source.clone(),
            total_score: (scored.total_score * 10.0).round() / 10.0,
            confidence: scored.confidence.as_str().to_string(),
            recommendation: if scored.is_buy() { "BUY" } else { "SKIP" }.to_string(),
            summary: scored.summary(),
            recorded_at: Utc::now(),
        }
    }
}

pub fn signal_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::days(SIGNAL_RETENTION_DAYS)
}

#[async_trait]
pub trait PositionStore: Send + Sync {
    /// Insert a new OPEN position.
    ///
    /// Fails with `DuplicatePosition` if the asset already has one; the
    /// check and the insert are atomic.
    async fn open(&self, position: Position) -> TradeResult<()>;

    /// Close the OPEN position for `asset_id` and record its trade.
    ///
    /// Returns `None` when no OPEN position exists, so closing twice is a
    /// no-op.
    async fn close(
        &self,
        asset_id: &str,
        sell_price: Decimal,
        reason: ExitReason,
        detail: &str,
    ) -> TradeResult<Option<Trade>>;

    async fn list_open(&self) -> TradeResult<Vec<Position>>;

    async fn get_open(&self, asset_id: &str) -> TradeResult<Option<Position>>;

    async fn has_open(&self, asset_id: &str) -> TradeResult<bool> {
        Ok(self.get_open(asset_id).await?.is_some())
    }

    /// Raise the recorded peak pnl. Lower values are ignored.
    async fn update_peak(&self, asset_id: &str, peak_pnl_percent: Decimal) -> TradeResult<()>;

    /// Most recent trades first.
    async fn trade_history(&self, limit: i64) -> TradeResult<Vec<Trade>>;

    /// Trades sold at or after `since`.
    async fn trades_since(&self, since: DateTime<Utc>) -> TradeResult<Vec<Trade>>;

    /// Append an audit record and drop records past the retention window.
    async fn save_signal(&self, record: &SignalRecord) -> TradeResult<()>;

    /// Most recent signal records first.
    async fn recent_signals(&self, limit: i64) -> TradeResult<Vec<SignalRecord>>;

    async fn save_status(&self, status: &BotStatus) -> TradeResult<()>;

    async fn load_status(&self) -> TradeResult<Option<BotStatus>>;
}

/// Store contract checks shared by both backends.
#[cfg(test)]
pub(crate) mod contract_tests {
    use super::*;
    use rust_decimal_macros::dec;

    pub async fn open_is_unique(store: &dyn PositionStore) {
        store
            .open(Position::open("FOO", "mintF", "dex_boosted", dec!(150), dec!(1)))
            .await
            .unwrap();
        let err = store
            .open(Position::open("FOO", "mintF", "dex_boosted", dec!(10), dec!(2)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVARIANT_VIOLATION");
        assert_eq!(store.list_open().await.unwrap().len(), 1);
        assert!(store.has_open("FOO").await.unwrap());
    }

    pub async fn close_once(store: &dyn PositionStore) {
        store
            .open(Position::open("FOO", "mintF", "dex_boosted", dec!(133.5), dec!(1.125)))
            .await
            .unwrap();

        let trade = store
            .close("FOO", dec!(1.31), ExitReason::TakeProfit, "tp")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(trade.pnl_usd, (dec!(1.31) - dec!(1.125)) * dec!(133.5));
        assert_eq!(trade.exit_reason, ExitReason::TakeProfit);
        assert!(!store.has_open("FOO").await.unwrap());

        // Second close is a no-op
        assert!(store.close("FOO", dec!(2), ExitReason::Manual, "").await.unwrap().is_none());
        assert_eq!(store.trade_history(10).await.unwrap().len(), 1);

        // Asset can be re-entered after closing
        store
            .open(Position::open("FOO", "mintF", "dex_boosted", dec!(1), dec!(1)))
            .await
            .unwrap();
    }

    pub async fn peak_only_rises(store: &dyn PositionStore) {
        store
            .open(Position::open("FOO", "mintF", "dex_boosted", dec!(1), dec!(1)))
            .await
            .unwrap();
        store.update_peak("FOO", dec!(30)).await.unwrap();
        store.update_peak("FOO", dec!(12)).await.unwrap();
        let pos = store.get_open("FOO").await.unwrap().unwrap();
        assert_eq!(pos.peak_pnl_percent, dec!(30));
    }

    pub async fn history_newest_first(store: &dyn PositionStore) {
        for (asset, price) in [("A", dec!(1.1)), ("B", dec!(0.9)), ("C", dec!(1.5))] {
            store
                .open(Position::open(asset, "", "dex_boosted", dec!(10), dec!(1)))
                .await
                .unwrap();
            store.close(asset, price, ExitReason::Manual, "").await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        let history = store.trade_history(2).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].asset_id, "C");
        assert_eq!(history[1].asset_id, "B");

        let since = store.trades_since(Utc::now() - Duration::hours(1)).await.unwrap();
        assert_eq!(since.len(), 3);
        let total: Decimal = since.iter().map(|t| t.pnl_usd).sum();
        assert_eq!(total, dec!(5));
    }

    pub async fn signals_and_status(store: &dyn PositionStore) {
        let mut old = SignalRecord {
            asset_id: "OLD".into(),
            contract_ref: String::new(),
            source: "dex_boosted".into(),
            total_score: 40.0,
            confidence: "LOW".into(),
            recommendation: "SKIP".into(),
            summary: String::new(),
            recorded_at: Utc::now() - Duration::days(8),
        };
        store.save_signal(&old).await.unwrap();
        old.asset_id = "NEW".into();
        old.recorded_at = Utc::now();
        store.save_signal(&old).await.unwrap();

        let signals = store.recent_signals(10).await.unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].asset_id, "NEW");

        assert!(store.load_status().await.unwrap().is_none());
        let mut status = BotStatus::new(true);
        status.scan.record_error("boom");
        store.save_status(&status).await.unwrap();
        let loaded = store.load_status().await.unwrap().unwrap();
        assert_eq!(loaded.scan.consecutive_errors, 1);
        assert_eq!(loaded.scan.last_error.as_deref(), Some("boom"));
    }
}

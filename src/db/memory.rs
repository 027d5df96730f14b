//! In-memory store with a bounded signal ring buffer.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use super::{signal_cutoff, PositionStore, SignalRecord};
use crate::error::{TradeError, TradeResult};
use crate::models::{BotStatus, ExitReason, Position, PositionStatus, Trade};

/// Hard cap on buffered signal records, on top of the retention window.
const MAX_SIGNALS: usize = 10_000;

#[derive(Debug, Default)]
struct Inner {
    open: HashMap<String, Position>,
    closed: Vec<Position>,
    trades: Vec<Trade>,
    signals: VecDeque<SignalRecord>,
    status: Option<BotStatus>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PositionStore for MemoryStore {
    async fn open(&self, position: Position) -> TradeResult<()> {
        let mut inner = self.inner.write().await;
        if inner.open.contains_key(&position.asset_id) {
            return Err(TradeError::DuplicatePosition(position.asset_id));
        }
        inner.open.insert(position.asset_id.clone(), position);
        Ok(())
    }

    async fn close(
        &self,
        asset_id: &str,
        sell_price: Decimal,
        reason: ExitReason,
        detail: &str,
    ) -> TradeResult<Option<Trade>> {
        let mut inner = self.inner.write().await;
        let Some(mut position) = inner.open.remove(asset_id) else {
            return Ok(None);
        };

        let trade = Trade::from_close(&position, sell_price, Utc::now(), reason, detail);
        position.status = PositionStatus::Closed;
        inner.closed.push(position);
        inner.trades.push(trade.clone());
        Ok(Some(trade))
    }

    async fn list_open(&self) -> TradeResult<Vec<Position>> {
        let inner = self.inner.read().await;
        let mut positions: Vec<Position> = inner.open.values().cloned().collect();
        positions.sort_by_key(|p| p.open_time);
        Ok(positions)
    }

    async fn get_open(&self, asset_id: &str) -> TradeResult<Option<Position>> {
        Ok(self.inner.read().await.open.get(asset_id).cloned())
    }

    async fn update_peak(&self, asset_id: &str, peak_pnl_percent: Decimal) -> TradeResult<()> {
        if let Some(position) = self.inner.write().await.open.get_mut(asset_id) {
            position.raise_peak(peak_pnl_percent);
        }
        Ok(())
    }

    async fn trade_history(&self, limit: i64) -> TradeResult<Vec<Trade>> {
        let inner = self.inner.read().await;
        Ok(inner
            .trades
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn trades_since(&self, since: DateTime<Utc>) -> TradeResult<Vec<Trade>> {
        let inner = self.inner.read().await;
        Ok(inner.trades.iter().filter(|t| t.sell_time >= since).cloned().collect())
    }

    async fn save_signal(&self, record: &SignalRecord) -> TradeResult<()> {
        let mut inner = self.inner.write().await;
        inner.signals.push_back(record.clone());

        let cutoff = signal_cutoff(Utc::now());
        inner.signals.retain(|s| s.recorded_at >= cutoff);
        while inner.signals.len() > MAX_SIGNALS {
            inner.signals.pop_front();
        }
        Ok(())
    }

    async fn recent_signals(&self, limit: i64) -> TradeResult<Vec<SignalRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .signals
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn save_status(&self, status: &BotStatus) -> TradeResult<()> {
        self.inner.write().await.status = Some(status.clone());
        Ok(())
    }

    async fn load_status(&self) -> TradeResult<Option<BotStatus>> {
        Ok(self.inner.read().await.status.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::contract_tests;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_open_is_unique() {
        contract_tests::open_is_unique(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_close_once() {
        contract_tests::close_once(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_peak_only_rises() {
        contract_tests::peak_only_rises(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_history_newest_first() {
        contract_tests::history_newest_first(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_signals_and_status() {
        contract_tests::signals_and_status(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_concurrent_opens_keep_one_position() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .open(Position::open("FOO", "mintF", "dex_boosted", dec!(1), Decimal::from(i + 1)))
                    .await
            }));
        }

        let mut ok = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                ok += 1;
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(store.list_open().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_closed_position_keeps_matching_trade() {
        let store = MemoryStore::new();
        store
            .open(Position::open("FOO", "mintF", "dex_boosted", dec!(2), dec!(1)))
            .await
            .unwrap();
        store.close("FOO", dec!(1.5), ExitReason::Manual, "").await.unwrap();

        let inner = store.inner.read().await;
        assert_eq!(inner.closed.len(), 1);
        assert_eq!(inner.closed[0].status, PositionStatus::Closed);
        assert_eq!(inner.trades.len(), 1);
        assert_eq!(inner.trades[0].pnl_usd, dec!(1));
    }
}

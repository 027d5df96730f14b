//! External collaborators: signal feeds, market data and account balances.
//!
//! These are thin HTTP clients behind traits so the trading core can be
//! driven by fakes in tests.

mod account;
mod dexscreener;
mod gecko;

pub use account::{PaperAccount, SolanaRpcAccount};
pub use dexscreener::{DexScreenerMarket, DexScreenerSignals};
pub use gecko::GeckoTrendingSignals;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use rust_decimal::Decimal;
use tracing::warn;

use crate::error::{TradeError, TradeResult};
use crate::execution::Direction;
use crate::models::{dedupe_signals, Signal, TokenData};
use crate::risk::Balances;

/// Timeout for data-provider calls.
pub const DATA_TIMEOUT: Duration = Duration::from_secs(10);

/// A feed of opportunity candidates.
#[async_trait]
pub trait SignalSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch_signals(&self) -> Result<Vec<Signal>>;
}

/// Live market data lookups. Missing data is `TokenData::default()`.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// `asset_ref` is a contract address when known, otherwise a symbol.
    async fn get_token_data(&self, asset_ref: &str) -> TokenData;
}

/// Wallet balances for the risk gate and position sizing.
#[async_trait]
pub trait AccountProvider: Send + Sync {
    async fn get_balances(&self) -> Result<Balances>;

    /// Called after a filled order with its stable-asset notional.
    async fn record_fill(&self, _direction: Direction, _notional_usd: Decimal) {}
}

/// Fan out to several feeds and merge the results.
///
/// A failing feed is logged and skipped; the others still contribute. When
/// every feed fails the scan has no data and reports it as an error.
pub struct SignalAggregator {
    sources: Vec<Arc<dyn SignalSource>>,
}

impl SignalAggregator {
    pub fn new(sources: Vec<Arc<dyn SignalSource>>) -> Self {
        Self { sources }
    }

    /// Default public feeds.
    pub fn public() -> Result<Self> {
        Ok(Self::new(vec![
            Arc::new(DexScreenerSignals::new()?),
            Arc::new(GeckoTrendingSignals::new()?),
        ]))
    }

    /// All signals, deduplicated by asset identity.
    pub async fn get_all_signals(&self) -> TradeResult<Vec<Signal>> {
        if self.sources.is_empty() {
            return Err(TradeError::DataUnavailable("no signal sources configured".into()));
        }

        let results = join_all(self.sources.iter().map(|s| s.fetch_signals())).await;

        let mut signals = Vec::new();
        let mut failed = 0;
        for (source, result) in self.sources.iter().zip(results) {
            match result {
                Ok(batch) => signals.extend(batch),
                Err(e) => {
                    failed += 1;
                    warn!(source = source.name(), error = %e, "Signal source failed");
                }
            }
        }

        if failed == self.sources.len() {
            return Err(TradeError::DataUnavailable(format!("all {} signal sources failed", failed)));
        }
        Ok(dedupe_signals(signals))
    }
}

/// Parse a price string, accepting scientific notation.
pub(crate) fn parse_price(s: &str) -> Decimal {
    s.parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(s))
        .unwrap_or(Decimal::ZERO)
}

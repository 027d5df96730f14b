//! Order execution: routing quotes, building and submitting swaps.
//!
//! [`OrderExecutor`] wraps an [`OrderRouter`] with the pending-order guard,
//! per-call timeouts and bounded retries.

mod engine;
mod guard;
mod jupiter;
mod paper;

pub use engine::{ExecutionPolicy, OrderExecutor};
pub use guard::PendingOrderGuard;
pub use jupiter::{JupiterRouter, USDC_MINT};
pub use paper::PaperRouter;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Order direction. BUY spends the stable asset, SELL returns to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Buy => f.write_str("BUY"),
            Direction::Sell => f.write_str("SELL"),
        }
    }
}

/// A single swap intent.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub direction: Direction,
    /// Contract / mint of the traded asset
    pub asset_ref: String,
    /// USD for BUY, token quantity for SELL
    pub amount: Decimal,
}

/// Routing quote for a swap.
#[derive(Debug, Clone)]
pub struct Quote {
    pub input_ref: String,
    pub output_ref: String,
    pub in_amount: u64,
    pub out_amount: u64,
    /// Price impact in percent
    pub price_impact_percent: f64,
    /// Router-specific quote body, passed back when building
    pub raw: serde_json::Value,
}

/// Unsigned transaction produced from a quote.
#[derive(Debug, Clone)]
pub struct UnsignedTx {
    /// Base64-encoded transaction
    pub payload: String,
}

/// Errors from a routing service call.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("stale blockhash: {0}")]
    StaleBlockhash(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("no viable route: {0}")]
    NoRoute(String),

    #[error("price impact {impact:.2}% exceeds {limit:.2}%")]
    PriceImpact { impact: f64, limit: f64 },

    #[error("transaction rejected: {0}")]
    Rejected(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
}

impl RouteError {
    /// Whether resubmitting the same intent may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RouteError::Timeout(_) | RouteError::StaleBlockhash(_) | RouteError::Network(_) => true,
            RouteError::Http { status, .. } => *status == 429 || *status >= 500,
            RouteError::NoRoute(_) | RouteError::PriceImpact { .. } | RouteError::Rejected(_) => false,
        }
    }
}

impl From<reqwest::Error> for RouteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RouteError::Timeout("request")
        } else if e.is_decode() {
            RouteError::Rejected(format!("invalid response: {}", e))
        } else {
            RouteError::Network(e.to_string())
        }
    }
}

/// External swap routing service.
#[async_trait]
pub trait OrderRouter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the router is connected and able to sign.
    fn is_ready(&self) -> bool;

    async fn quote(&self, request: &OrderRequest) -> Result<Quote, RouteError>;

    async fn build_transaction(&self, quote: &Quote) -> Result<UnsignedTx, RouteError>;

    /// Sign and broadcast. `idempotency_key` is unique per attempt.
    /// Returns the transaction reference.
    async fn submit(&self, tx: &UnsignedTx, idempotency_key: &str) -> Result<String, RouteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RouteError::Timeout("quote").is_transient());
        assert!(RouteError::StaleBlockhash("expired".into()).is_transient());
        assert!(RouteError::Http { status: 503, body: String::new() }.is_transient());
        assert!(RouteError::Http { status: 429, body: String::new() }.is_transient());

        assert!(!RouteError::NoRoute("none".into()).is_transient());
        assert!(!RouteError::Rejected("bad".into()).is_transient());
        assert!(!RouteError::Http { status: 400, body: String::new() }.is_transient());
        assert!(!RouteError::PriceImpact { impact: 9.0, limit: 5.0 }.is_transient());
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::Buy.to_string(), "BUY");
        assert_eq!(Direction::Sell.to_string(), "SELL");
    }
}

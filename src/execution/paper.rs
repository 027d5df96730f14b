//! Simulated router for paper trading.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use tracing::debug;
use uuid::Uuid;

use super::{OrderRequest, OrderRouter, Quote, RouteError, UnsignedTx};

/// Router that fills every order without touching the network.
#[derive(Debug, Default)]
pub struct PaperRouter {
    fills: AtomicU64,
}

impl PaperRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fills(&self) -> u64 {
        self.fills.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl OrderRouter for PaperRouter {
    fn name(&self) -> &'static str {
        "paper"
    }

    fn is_ready(&self) -> bool {
        true
    }

    async fn quote(&self, request: &OrderRequest) -> Result<Quote, RouteError> {
        let in_amount = request.amount.to_f64().unwrap_or(0.0);
        if in_amount <= 0.0 {
            return Err(RouteError::NoRoute(format!("non-positive amount {}", request.amount)));
        }
        let raw = (in_amount * 1e6) as u64;
        Ok(Quote {
            input_ref: "USDC".to_string(),
            output_ref: request.asset_ref.clone(),
            in_amount: raw,
            out_amount: raw,
            price_impact_percent: 0.0,
            raw: serde_json::json!({ "paper": true, "direction": request.direction }),
        })
    }

    async fn build_transaction(&self, quote: &Quote) -> Result<UnsignedTx, RouteError> {
        Ok(UnsignedTx {
            payload: format!("paper:{}:{}", quote.output_ref, quote.in_amount),
        })
    }

    async fn submit(&self, tx: &UnsignedTx, idempotency_key: &str) -> Result<String, RouteError> {
        self.fills.fetch_add(1, Ordering::Relaxed);
        debug!(tx = %tx.payload, key = %idempotency_key, "Paper fill");
        Ok(format!("paper-{}", Uuid::new_v4()))
    }
}

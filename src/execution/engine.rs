//! Guarded, retrying order execution.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Direction, OrderRequest, OrderRouter, PendingOrderGuard, RouteError};
use crate::error::{TradeError, TradeResult};

/// Attempt limits, backoff and per-call timeouts.
#[derive(Debug, Clone)]
pub struct ExecutionPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub quote_timeout: Duration,
    pub build_timeout: Duration,
    pub submit_timeout: Duration,
    /// Quotes above this impact are refused as having no viable route
    pub max_price_impact_percent: f64,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(4),
            quote_timeout: Duration::from_secs(5),
            build_timeout: Duration::from_secs(5),
            submit_timeout: Duration::from_secs(10),
            max_price_impact_percent: 5.0,
        }
    }
}

/// Successful order result.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderOutcome {
    pub tx_ref: String,
    pub attempts: u32,
}

/// Executes swaps through a router with at-most-one in-flight order per
/// (asset, direction).
pub struct OrderExecutor {
    router: Arc<dyn OrderRouter>,
    guard: PendingOrderGuard,
    policy: ExecutionPolicy,
    last_trade_at: Mutex<Option<DateTime<Utc>>>,
}

impl OrderExecutor {
    pub fn new(router: Arc<dyn OrderRouter>, policy: ExecutionPolicy) -> Self {
        Self {
            router,
            guard: PendingOrderGuard::new(),
            policy,
            last_trade_at: Mutex::new(None),
        }
    }

    pub fn router_name(&self) -> &'static str {
        self.router.name()
    }

    pub fn guard(&self) -> &PendingOrderGuard {
        &self.guard
    }

    pub fn last_trade_at(&self) -> Option<DateTime<Utc>> {
        *self.last_trade_at.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Execute a swap.
    ///
    /// `amount` is USD for BUY and token quantity for SELL. Transient
    /// failures are retried up to `max_attempts`; everything else fails on
    /// the first occurrence. The guard entry is released on every path.
    pub async fn execute(&self, direction: Direction, asset_ref: &str, amount: Decimal) -> TradeResult<OrderOutcome> {
        if !self.router.is_ready() {
            return Err(TradeError::NotInitialized);
        }

        let _ticket = self
            .guard
            .try_acquire(asset_ref, direction)
            .ok_or_else(|| TradeError::OrderAlreadyPending {
                asset: asset_ref.to_string(),
                direction,
            })?;

        let request = OrderRequest {
            direction,
            asset_ref: asset_ref.to_string(),
            amount,
        };

        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.policy.initial_backoff)
            .with_max_interval(self.policy.max_backoff)
            .with_max_elapsed_time(None)
            .build();

        let attempts = AtomicU32::new(0);
        let result = retry(backoff, || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let request = &request;
            async move {
                match self.attempt(request).await {
                    Ok(tx_ref) => Ok(tx_ref),
                    Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                        warn!(
                            asset = %request.asset_ref,
                            direction = %request.direction,
                            attempt = attempt,
                            error = %e,
                            "Order attempt failed, retrying"
                        );
                        Err(backoff::Error::transient(e))
                    }
                    Err(e) => Err(backoff::Error::permanent(e)),
                }
            }
        })
        .await;

        let attempts = attempts.load(Ordering::SeqCst);
        match result {
            Ok(tx_ref) => {
                *self.last_trade_at.lock().unwrap_or_else(|p| p.into_inner()) = Some(Utc::now());
                info!(
                    router = self.router.name(),
                    asset = %asset_ref,
                    direction = %direction,
                    amount = %amount,
                    tx = %tx_ref,
                    attempts = attempts,
                    "Order executed"
                );
                Ok(OrderOutcome { tx_ref, attempts })
            }
            Err(e) if e.is_transient() => Err(TradeError::OrderTransient(format!(
                "{} after {} attempts",
                e, attempts
            ))),
            Err(e) => Err(TradeError::OrderTerminal(e.to_string())),
        }
    }

    /// One quote → build → submit pass with a fresh idempotency key.
    async fn attempt(&self, request: &OrderRequest) -> Result<String, RouteError> {
        let quote = timeout(self.policy.quote_timeout, self.router.quote(request))
            .await
            .map_err(|_| RouteError::Timeout("quote"))??;

        if quote.out_amount == 0 {
            return Err(RouteError::NoRoute(format!("zero output for {}", request.asset_ref)));
        }
        if quote.price_impact_percent.abs() > self.policy.max_price_impact_percent {
            return Err(RouteError::PriceImpact {
                impact: quote.price_impact_percent.abs(),
                limit: self.policy.max_price_impact_percent,
            });
        }

        let tx = timeout(self.policy.build_timeout, self.router.build_transaction(&quote))
            .await
            .map_err(|_| RouteError::Timeout("build"))??;

        let idempotency_key = Uuid::new_v4().to_string();
        debug!(asset = %request.asset_ref, key = %idempotency_key, "Submitting transaction");

        timeout(self.policy.submit_timeout, self.router.submit(&tx, &idempotency_key))
            .await
            .map_err(|_| RouteError::Timeout("submit"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{Quote, UnsignedTx};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::collections::{HashSet, VecDeque};
    use std::sync::atomic::AtomicUsize;

    /// Router whose submit results are scripted per call.
    struct ScriptedRouter {
        ready: bool,
        quote_delay: Duration,
        price_impact: f64,
        submits: AtomicUsize,
        keys: Mutex<HashSet<String>>,
        script: Mutex<VecDeque<Result<String, RouteError>>>,
    }

    impl ScriptedRouter {
        fn new(script: Vec<Result<String, RouteError>>) -> Self {
            Self {
                ready: true,
                quote_delay: Duration::ZERO,
                price_impact: 0.1,
                submits: AtomicUsize::new(0),
                keys: Mutex::new(HashSet::new()),
                script: Mutex::new(script.into()),
            }
        }
    }

    #[async_trait]
    impl OrderRouter for ScriptedRouter {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn is_ready(&self) -> bool {
            self.ready
        }

        async fn quote(&self, request: &OrderRequest) -> Result<Quote, RouteError> {
            if !self.quote_delay.is_zero() {
                tokio::time::sleep(self.quote_delay).await;
            }
            Ok(Quote {
                input_ref: "USDC".into(),
                output_ref: request.asset_ref.clone(),
                in_amount: 1_000_000,
                out_amount: 42,
                price_impact_percent: self.price_impact,
                raw: serde_json::Value::Null,
            })
        }

        async fn build_transaction(&self, _quote: &Quote) -> Result<UnsignedTx, RouteError> {
            Ok(UnsignedTx { payload: "tx".into() })
        }

        async fn submit(&self, _tx: &UnsignedTx, idempotency_key: &str) -> Result<String, RouteError> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            self.keys.lock().unwrap().insert(idempotency_key.to_string());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("sig".to_string()))
        }
    }

    fn fast_policy() -> ExecutionPolicy {
        ExecutionPolicy {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_not_initialized_fails_fast() {
        let mut router = ScriptedRouter::new(vec![]);
        router.ready = false;
        let router = Arc::new(router);
        let executor = OrderExecutor::new(router.clone(), fast_policy());

        let err = executor.execute(Direction::Buy, "mintF", dec!(150)).await.unwrap_err();
        assert_eq!(err.code(), "NOT_INITIALIZED");
        assert_eq!(router.submits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_same_key_submits_once() {
        let mut router = ScriptedRouter::new(vec![]);
        router.quote_delay = Duration::from_millis(50);
        let router = Arc::new(router);
        let executor = OrderExecutor::new(router.clone(), fast_policy());

        let (first, second) = tokio::join!(
            executor.execute(Direction::Buy, "mintF", dec!(150)),
            executor.execute(Direction::Buy, "mintF", dec!(150)),
        );

        assert!(first.is_ok());
        assert_eq!(second.unwrap_err().code(), "ORDER_ALREADY_PENDING");
        assert_eq!(router.submits.load(Ordering::SeqCst), 1);
        assert!(executor.guard().is_empty());
    }

    #[tokio::test]
    async fn test_transient_failures_retry_with_fresh_keys() {
        let router = Arc::new(ScriptedRouter::new(vec![
            Err(RouteError::Timeout("submit")),
            Err(RouteError::StaleBlockhash("Blockhash not found".into())),
            Ok("sig-3".into()),
        ]));
        let executor = OrderExecutor::new(router.clone(), fast_policy());

        let outcome = executor.execute(Direction::Sell, "mintF", dec!(10)).await.unwrap();
        assert_eq!(outcome.tx_ref, "sig-3");
        assert_eq!(outcome.attempts, 3);
        assert_eq!(router.keys.lock().unwrap().len(), 3);
        assert!(executor.last_trade_at().is_some());
    }

    #[tokio::test]
    async fn test_retries_exhausted_returns_transient() {
        let router = Arc::new(ScriptedRouter::new(vec![
            Err(RouteError::Timeout("submit")),
            Err(RouteError::Timeout("submit")),
            Err(RouteError::Timeout("submit")),
            Ok("never".into()),
        ]));
        let executor = OrderExecutor::new(router.clone(), fast_policy());

        let err = executor.execute(Direction::Buy, "mintF", dec!(150)).await.unwrap_err();
        assert_eq!(err.code(), "ORDER_TRANSIENT_FAILURE");
        assert_eq!(router.submits.load(Ordering::SeqCst), 3);
        assert!(executor.guard().is_empty());
        assert!(executor.last_trade_at().is_none());
    }

    #[tokio::test]
    async fn test_terminal_failure_does_not_retry() {
        let router = Arc::new(ScriptedRouter::new(vec![Err(RouteError::Rejected("insufficient funds".into()))]));
        let executor = OrderExecutor::new(router.clone(), fast_policy());

        let err = executor.execute(Direction::Buy, "mintF", dec!(150)).await.unwrap_err();
        assert_eq!(err.code(), "ORDER_TERMINAL_FAILURE");
        assert_eq!(router.submits.load(Ordering::SeqCst), 1);
        assert!(executor.guard().is_empty());
    }

    #[tokio::test]
    async fn test_high_price_impact_is_terminal() {
        let mut router = ScriptedRouter::new(vec![]);
        router.price_impact = 7.5;
        let router = Arc::new(router);
        let executor = OrderExecutor::new(router.clone(), fast_policy());

        let err = executor.execute(Direction::Buy, "mintF", dec!(150)).await.unwrap_err();
        assert_eq!(err.code(), "ORDER_TERMINAL_FAILURE");
        assert_eq!(router.submits.load(Ordering::SeqCst), 0);
    }
}

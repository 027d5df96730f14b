//! Position lifecycle: NONE → OPENING → OPEN → CLOSING → CLOSED.
//!
//! OPENING and CLOSING are in-process claims keyed by asset. A claim is held
//! for the whole order attempt and released on every exit path, so an entry
//! and an exit for the same asset never overlap. OPEN and CLOSED live in the
//! position store.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::api::{AccountProvider, MarketDataProvider};
use crate::config::{ConfigHandle, TradingConfig};
use crate::db::{PositionStore, SignalRecord};
use crate::error::{TradeError, TradeResult};
use crate::execution::{Direction, OrderExecutor};
use crate::exit::ExitEvaluator;
use crate::models::{dedupe_signals, ExitReason, Position, Signal, TokenData, Trade};
use crate::risk::{HealthReport, RiskGate};
use crate::scoring::{OpportunityScorer, ScoredOpportunity};

/// Transient per-asset state while an order is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Opening,
    Closing,
}

/// Why an entry was not taken.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    NotRecommended,
    TradingDisabled,
    Blacklisted,
    Cooldown,
    DailyLossLimit(Decimal),
    MaxPositions(usize),
    AlreadyOpen,
    InProgress(LifecycleState),
    RiskPaused(String),
    Quality(String),
    BelowMinimum(Decimal),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotRecommended => write!(f, "score below buy threshold"),
            SkipReason::TradingDisabled => write!(f, "trading disabled"),
            SkipReason::Blacklisted => write!(f, "blacklisted"),
            SkipReason::Cooldown => write!(f, "sold at a loss recently"),
            SkipReason::DailyLossLimit(loss) => write!(f, "daily loss limit hit (${:.2})", loss),
            SkipReason::MaxPositions(n) => write!(f, "max open positions ({})", n),
            SkipReason::AlreadyOpen => write!(f, "position already open"),
            SkipReason::InProgress(state) => write!(f, "order in progress ({:?})", state),
            SkipReason::RiskPaused(why) => write!(f, "risk gate paused trading: {}", why),
            SkipReason::Quality(why) => write!(f, "quality gate: {}", why),
            SkipReason::BelowMinimum(size) => write!(f, "size ${:.2} below minimum", size),
        }
    }
}

/// Result of an entry decision.
#[derive(Debug, Clone, PartialEq)]
pub enum OpenOutcome {
    Opened(Position),
    Skipped(SkipReason),
}

/// Counters for one cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub signals: usize,
    pub scored: usize,
    pub opened: usize,
    pub evaluated: usize,
    pub closed: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "signals={} scored={} opened={} evaluated={} closed={} skipped={} errors={}",
            self.signals, self.scored, self.opened, self.evaluated, self.closed, self.skipped, self.errors
        )
    }
}

/// Market quality gate for entries. Returns the first failing check.
pub fn quality_gate(data: &TokenData, config: &TradingConfig) -> Option<String> {
    if data.liquidity < config.min_liquidity_usd {
        return Some(format!("liquidity ${:.0} < ${:.0}", data.liquidity, config.min_liquidity_usd));
    }
    if data.volume_24h < config.min_volume_24h_usd {
        return Some(format!("24h volume ${:.0} < ${:.0}", data.volume_24h, config.min_volume_24h_usd));
    }
    if data.trades_1h() < config.min_trades_1h {
        return Some(format!("{} trades in 1h", data.trades_1h()));
    }
    if data.change_1h < config.min_change_1h_percent {
        return Some(format!("dumping ({:+.1}% 1h)", data.change_1h));
    }
    None
}

/// Reference passed to routers and market data for a position.
fn position_ref(position: &Position) -> &str {
    if position.contract_ref.is_empty() {
        &position.asset_id
    } else {
        &position.contract_ref
    }
}

/// Releases the asset's claim on drop.
struct Claim<'a> {
    claims: &'a Mutex<HashMap<String, LifecycleState>>,
    asset_id: String,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.claims
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&self.asset_id);
    }
}

/// Everything the lifecycle manager drives.
pub struct Components {
    pub store: Arc<dyn PositionStore>,
    pub executor: Arc<OrderExecutor>,
    pub risk: Arc<RiskGate>,
    pub scorer: Arc<OpportunityScorer>,
    pub exits: Arc<ExitEvaluator>,
    pub market: Arc<dyn MarketDataProvider>,
    pub account: Arc<dyn AccountProvider>,
    pub config: ConfigHandle,
}

pub struct PositionManager {
    store: Arc<dyn PositionStore>,
    executor: Arc<OrderExecutor>,
    risk: Arc<RiskGate>,
    scorer: Arc<OpportunityScorer>,
    exits: Arc<ExitEvaluator>,
    market: Arc<dyn MarketDataProvider>,
    account: Arc<dyn AccountProvider>,
    config: ConfigHandle,
    claims: Mutex<HashMap<String, LifecycleState>>,
}

impl PositionManager {
    pub fn new(components: Components) -> Self {
        Self {
            store: components.store,
            executor: components.executor,
            risk: components.risk,
            scorer: components.scorer,
            exits: components.exits,
            market: components.market,
            account: components.account,
            config: components.config,
            claims: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn PositionStore> {
        &self.store
    }

    pub fn executor(&self) -> &OrderExecutor {
        &self.executor
    }

    /// Current transient state of an asset, if an order is in flight.
    pub fn state_of(&self, asset_id: &str) -> Option<LifecycleState> {
        self.claims
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(asset_id)
            .copied()
    }

    /// Insert-if-absent on the claim map. The lock is never held across I/O.
    fn claim(&self, asset_id: &str, state: LifecycleState) -> Result<Claim<'_>, LifecycleState> {
        let mut claims = self.claims.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(existing) = claims.get(asset_id) {
            return Err(*existing);
        }
        claims.insert(asset_id.to_string(), state);
        Ok(Claim {
            claims: &self.claims,
            asset_id: asset_id.to_string(),
        })
    }

    // ==================== Entry ====================

    /// Slow cycle: score a batch of signals and open positions for BUYs.
    ///
    /// Per-asset failures are logged and counted; they never abort the batch.
    pub async fn process_signals(&self, signals: Vec<Signal>) -> TradeResult<CycleReport> {
        let config = self.config.snapshot().await;
        let signals = dedupe_signals(signals);
        let mut report = CycleReport {
            signals: signals.len(),
            ..Default::default()
        };

        for signal in signals.into_iter().take(config.signal_batch_size) {
            let data = self.market.get_token_data(signal.order_ref()).await;
            let snapshot = if data.has_price() {
                signal.market_snapshot.with_market(&data)
            } else {
                signal.market_snapshot.clone()
            };

            let scored = self.scorer.score_opportunity(&signal, &snapshot);
            report.scored += 1;

            if let Err(e) = self
                .store
                .save_signal(&SignalRecord::from_scored(&scored, &signal.contract_ref))
                .await
            {
                warn!(asset = %signal.asset_id, error = %e, "Failed to record signal");
            }

            if !scored.is_buy() {
                debug!(asset = %signal.asset_id, score = scored.total_score, "Skipping signal");
                report.skipped += 1;
                continue;
            }

            match self.open(&signal, &scored, &data).await {
                Ok(OpenOutcome::Opened(_)) => report.opened += 1,
                Ok(OpenOutcome::Skipped(reason)) => {
                    debug!(asset = %signal.asset_id, reason = %reason, "Entry skipped");
                    report.skipped += 1;
                }
                Err(TradeError::OrderAlreadyPending { .. }) => report.skipped += 1,
                Err(e) => {
                    warn!(asset = %signal.asset_id, code = e.code(), error = %e, "Entry failed");
                    report.errors += 1;
                }
            }
        }

        Ok(report)
    }

    /// Try to open a position for a scored signal.
    ///
    /// Filters run in order: recommendation, trading enabled, blacklist,
    /// loss cooldown, daily loss limit, max positions, existing or in-flight
    /// position, risk gate, price, market quality, sizing.
    pub async fn open(&self, signal: &Signal, scored: &ScoredOpportunity, data: &TokenData) -> TradeResult<OpenOutcome> {
        let config = self.config.snapshot().await;
        let asset = signal.asset_id.as_str();

        if !scored.is_buy() {
            return Ok(OpenOutcome::Skipped(SkipReason::NotRecommended));
        }
        if !config.trading_enabled {
            return Ok(OpenOutcome::Skipped(SkipReason::TradingDisabled));
        }
        if config.is_blacklisted(asset, &signal.contract_ref) {
            return Ok(OpenOutcome::Skipped(SkipReason::Blacklisted));
        }

        let now = Utc::now();
        let recent = self
            .store
            .trades_since(now - Duration::hours(config.cooldown_hours))
            .await?;
        if recent.iter().any(|t| t.asset_id == asset && t.pnl_usd < Decimal::ZERO) {
            return Ok(OpenOutcome::Skipped(SkipReason::Cooldown));
        }

        let day_start = Utc.from_utc_datetime(&now.date_naive().and_time(chrono::NaiveTime::MIN));
        let realized_today: Decimal = self
            .store
            .trades_since(day_start)
            .await?
            .iter()
            .map(|t| t.pnl_usd)
            .sum();
        if realized_today <= -config.daily_loss_limit() {
            return Ok(OpenOutcome::Skipped(SkipReason::DailyLossLimit(-realized_today)));
        }

        let open = self.store.list_open().await?;
        if open.len() >= config.max_open_positions {
            return Ok(OpenOutcome::Skipped(SkipReason::MaxPositions(config.max_open_positions)));
        }
        if open.iter().any(|p| p.asset_id == asset) {
            return Ok(OpenOutcome::Skipped(SkipReason::AlreadyOpen));
        }

        let _claim = match self.claim(asset, LifecycleState::Opening) {
            Ok(claim) => claim,
            Err(state) => return Ok(OpenOutcome::Skipped(SkipReason::InProgress(state))),
        };
        // Another task may have opened between the list and the claim
        if self.store.has_open(asset).await? {
            return Ok(OpenOutcome::Skipped(SkipReason::AlreadyOpen));
        }

        let (health, stable) = self.health_with(&open, &config).await?;
        if health.should_pause_trading {
            return Ok(OpenOutcome::Skipped(SkipReason::RiskPaused(health.warnings.join("; "))));
        }

        if !data.has_price() {
            return Err(TradeError::DataUnavailable(asset.to_string()));
        }
        if let Some(why) = quality_gate(data, &config) {
            return Ok(OpenOutcome::Skipped(SkipReason::Quality(why)));
        }

        let size = config.max_position_usd.min(stable);
        if size < config.min_position_usd {
            return Ok(OpenOutcome::Skipped(SkipReason::BelowMinimum(size)));
        }

        let outcome = self.executor.execute(Direction::Buy, signal.order_ref(), size).await?;
        self.account.record_fill(Direction::Buy, size).await;

        let quantity = size / data.price;
        let position = Position::open(asset, signal.contract_ref.as_str(), signal.source.as_str(), quantity, data.price);

        match self.store.open(position.clone()).await {
            Ok(()) => {
                info!(
                    asset = %asset,
                    source = %signal.source,
                    score = scored.total_score,
                    confidence = scored.confidence.as_str(),
                    usd = %size,
                    quantity = %quantity.round_dp(6),
                    price = %data.price,
                    tx = %outcome.tx_ref,
                    "Opened position"
                );
                Ok(OpenOutcome::Opened(position))
            }
            Err(TradeError::DuplicatePosition(_)) => {
                error!(asset = %asset, tx = %outcome.tx_ref, code = "INVARIANT_VIOLATION", "Bought into an already open position");
                Ok(OpenOutcome::Skipped(SkipReason::AlreadyOpen))
            }
            Err(e) => {
                error!(
                    asset = %asset,
                    tx = %outcome.tx_ref,
                    quantity = %quantity,
                    price = %data.price,
                    code = "INVARIANT_VIOLATION",
                    error = %e,
                    "Buy filled but the position was not recorded"
                );
                Err(e)
            }
        }
    }

    // ==================== Exit ====================

    /// Fast cycle: re-price open positions, raise peaks, close on exit signals.
    pub async fn monitor_positions(&self) -> TradeResult<CycleReport> {
        let config = self.config.snapshot().await;
        let open = self.store.list_open().await?;
        let mut report = CycleReport::default();

        for position in open {
            let data = self.market.get_token_data(position_ref(&position)).await;
            if !data.has_price() {
                let e = TradeError::DataUnavailable(position.asset_id.clone());
                warn!(asset = %position.asset_id, code = e.code(), "No price, skipping this cycle");
                report.errors += 1;
                continue;
            }

            let eval = self.exits.evaluate(&position, &data, &config).await;
            report.evaluated += 1;

            if eval.peak_raised(&position) {
                if let Err(e) = self.store.update_peak(&position.asset_id, eval.peak_pnl_percent).await {
                    warn!(asset = %position.asset_id, error = %e, "Failed to raise peak");
                }
            }

            let Some(signal) = eval.signal else {
                debug!(asset = %position.asset_id, pnl = %eval.pnl_percent.round_dp(2), "Holding");
                continue;
            };

            match self.close(&position, eval.price, signal.reason, &signal.detail).await {
                Ok(Some(_)) => report.closed += 1,
                Ok(None) => report.skipped += 1,
                Err(TradeError::OrderAlreadyPending { .. }) => report.skipped += 1,
                Err(e) => {
                    warn!(
                        asset = %position.asset_id,
                        code = e.code(),
                        error = %e,
                        "Exit failed, position stays open"
                    );
                    report.errors += 1;
                }
            }
        }

        Ok(report)
    }

    /// Sell a position and record its trade.
    ///
    /// Returns `None` if the position is no longer open or another order for
    /// the asset is in flight. On a failed sell the position stays OPEN and
    /// is re-evaluated next cycle.
    pub async fn close(
        &self,
        position: &Position,
        price: Decimal,
        reason: ExitReason,
        detail: &str,
    ) -> TradeResult<Option<Trade>> {
        let asset = position.asset_id.as_str();
        let _claim = match self.claim(asset, LifecycleState::Closing) {
            Ok(claim) => claim,
            Err(state) => {
                debug!(asset = %asset, state = ?state, "Close skipped, order in flight");
                return Ok(None);
            }
        };

        let Some(current) = self.store.get_open(asset).await? else {
            return Ok(None);
        };

        let outcome = self
            .executor
            .execute(Direction::Sell, position_ref(&current), current.quantity)
            .await?;
        self.account
            .record_fill(Direction::Sell, current.market_value(price))
            .await;

        let trade = match self.store.close(asset, price, reason, detail).await {
            Ok(trade) => trade,
            Err(e) => {
                error!(
                    asset = %asset,
                    tx = %outcome.tx_ref,
                    price = %price,
                    code = "INVARIANT_VIOLATION",
                    error = %e,
                    "Sell filled but the close was not recorded"
                );
                return Err(e);
            }
        };
        if let Some(trade) = &trade {
            info!(
                asset = %asset,
                reason = %reason,
                detail = %detail,
                pnl_usd = %trade.pnl_usd.round_dp(2),
                pnl_percent = %trade.pnl_percent.round_dp(2),
                held_hours = trade.hold_hours(),
                tx = %outcome.tx_ref,
                "Closed position"
            );
        }
        Ok(trade)
    }

    // ==================== Risk ====================

    /// Run the risk gate against live balances and marked positions.
    pub async fn check_health(&self) -> TradeResult<HealthReport> {
        let config = self.config.snapshot().await;
        let open = self.store.list_open().await?;
        Ok(self.health_with(&open, &config).await?.0)
    }

    async fn health_with(&self, open: &[Position], config: &TradingConfig) -> TradeResult<(HealthReport, Decimal)> {
        let balances = self
            .account
            .get_balances()
            .await
            .map_err(|e| TradeError::DataUnavailable(format!("balances: {}", e)))?;

        let mut positions_value = Decimal::ZERO;
        for position in open {
            let data = self.market.get_token_data(position_ref(position)).await;
            positions_value += if data.has_price() {
                position.market_value(data.price)
            } else {
                position.cost_basis()
            };
        }

        let report = self.risk.check(&balances, positions_value, config.min_position_usd);
        Ok((report, balances.stable))
    }

    /// Refresh the scorer's learned multipliers from trade history.
    pub async fn learn(&self) -> TradeResult<usize> {
        self.scorer.learn_from_history(self.store.as_ref()).await
    }
}

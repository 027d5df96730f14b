//! Bot runner: two independently scheduled loops over shared position state.
//!
//! - Scan loop (slow): reload settings, fetch signals, score, open positions
//! - Monitor loop (fast): re-price open positions, evaluate exits, close
//!
//! Each loop survives its own failures and records them in [`BotStatus`].
//! On shutdown no new cycles start, but a cycle already running (and any
//! order inside it) finishes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::api::{
    AccountProvider, DexScreenerMarket, MarketDataProvider, PaperAccount, SignalAggregator, SolanaRpcAccount,
};
use crate::config::{AdvisorCredentials, ConfigHandle, LiveCredentials, SettingsWatcher, TradingConfig};
use crate::db::{MemoryStore, PositionStore, SqliteStore};
use crate::execution::{ExecutionPolicy, JupiterRouter, OrderExecutor, OrderRouter, PaperRouter};
use crate::exit::{Advisor, ExitEvaluator, HttpAdvisor, NoopAdvisor};
use crate::lifecycle::{Components, CycleReport, PositionManager};
use crate::models::{BotStatus, Position};
use crate::risk::{PerformanceSummary, RiskGate};
use crate::scoring::OpportunityScorer;

/// Learning is refreshed every this many scan cycles.
pub const LEARN_EVERY_CYCLES: u64 = 30;

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Database URL; ignored when `in_memory` is set
    pub database_url: String,

    /// Use the in-memory store instead of SQLite
    pub in_memory: bool,

    /// JSON settings file re-read when modified
    pub settings_path: Option<PathBuf>,

    pub trading: TradingConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:./buzztrader.db?mode=rwc".to_string(),
            in_memory: false,
            settings_path: None,
            trading: TradingConfig::default(),
        }
    }
}

/// Open the configured position store.
pub async fn open_store(config: &BotConfig) -> Result<Arc<dyn PositionStore>> {
    if config.in_memory {
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = SqliteStore::new(&config.database_url)
        .await
        .context("Failed to open position store")?;
    Ok(Arc::new(store))
}

/// Main bot runner.
pub struct Bot {
    manager: Arc<PositionManager>,
    signals: SignalAggregator,
    config: ConfigHandle,
    settings: Mutex<Option<SettingsWatcher>>,
    status: Mutex<BotStatus>,
}

impl Bot {
    /// Wire up live or paper collaborators.
    ///
    /// Live mode with missing credentials is a CONFIG_ERROR: it is logged and
    /// the bot continues in paper mode.
    pub async fn new(mut config: BotConfig) -> Result<Self> {
        let store = open_store(&config).await?;

        let live = if config.trading.paper_trading {
            None
        } else {
            match LiveCredentials::from_env() {
                Ok(creds) => Some(creds),
                Err(e) => {
                    warn!(code = e.code(), error = %e, "Live execution disabled, running in paper mode");
                    config.trading.paper_trading = true;
                    None
                }
            }
        };

        let (router, account): (Arc<dyn OrderRouter>, Arc<dyn AccountProvider>) = match live {
            Some(creds) => {
                let account = SolanaRpcAccount::new(creds.rpc_url.clone(), creds.wallet_address.clone())?;
                let router = JupiterRouter::new(
                    creds,
                    config.trading.buy_slippage_bps,
                    config.trading.sell_slippage_bps,
                )?;
                (Arc::new(router), Arc::new(account))
            }
            None => (
                Arc::new(PaperRouter::new()),
                Arc::new(PaperAccount::new(config.trading.starting_portfolio_usd)),
            ),
        };

        let advisor: Arc<dyn Advisor> = match AdvisorCredentials::from_env() {
            Some(creds) => match HttpAdvisor::new(creds) {
                Ok(advisor) => Arc::new(advisor),
                Err(e) => {
                    warn!(error = %e, "Advisor unavailable, using fallback rule");
                    Arc::new(NoopAdvisor)
                }
            },
            None => Arc::new(NoopAdvisor),
        };

        let policy = ExecutionPolicy {
            max_price_impact_percent: config.trading.max_price_impact_percent,
            ..Default::default()
        };
        let market: Arc<dyn MarketDataProvider> = Arc::new(DexScreenerMarket::new()?);
        let handle = ConfigHandle::new(config.trading.clone());

        let manager = PositionManager::new(Components {
            store,
            executor: Arc::new(OrderExecutor::new(router, policy)),
            risk: Arc::new(RiskGate::new()),
            scorer: Arc::new(OpportunityScorer::new()),
            exits: Arc::new(ExitEvaluator::new(advisor)),
            market,
            account,
            config: handle.clone(),
        });

        Ok(Self::from_parts(
            Arc::new(manager),
            SignalAggregator::public()?,
            handle,
            config.settings_path.map(SettingsWatcher::new),
        ))
    }

    pub fn from_parts(
        manager: Arc<PositionManager>,
        signals: SignalAggregator,
        config: ConfigHandle,
        settings: Option<SettingsWatcher>,
    ) -> Self {
        Self {
            manager,
            signals,
            config,
            settings: Mutex::new(settings),
            status: Mutex::new(BotStatus::new(true)),
        }
    }

    /// Run both loops until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Result<()> {
        let config = self.config.snapshot().await;
        *self.status.lock().await = BotStatus::new(config.paper_trading);

        info!(
            paper = config.paper_trading,
            router = self.manager.executor().router_name(),
            scan_interval = config.scan_interval_secs,
            monitor_interval = config.monitor_interval_secs,
            "Starting bot"
        );

        match self.manager.learn().await {
            Ok(n) if n > 0 => info!(trades = n, "Loaded learned multipliers"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Initial learning failed"),
        }
        self.persist_status().await;

        let scan = tokio::spawn(self.clone().scan_loop(shutdown.clone()));
        let monitor = tokio::spawn(self.clone().monitor_loop(shutdown));

        let (scan, monitor) = tokio::join!(scan, monitor);
        if let Err(e) = scan {
            error!(error = %e, "Scan loop panicked");
        }
        if let Err(e) = monitor {
            error!(error = %e, "Monitor loop panicked");
        }

        self.status.lock().await.running = false;
        self.persist_status().await;
        info!("Bot shutdown complete");
        Ok(())
    }

    async fn scan_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut cycle: u64 = 0;
        while !*shutdown.borrow() {
            let result = self.scan_cycle(cycle).await;
            self.record(true, result).await;
            cycle += 1;

            let secs = self.config.snapshot().await.scan_interval_secs;
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        debug!("Scan loop stopped");
    }

    async fn monitor_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        while !*shutdown.borrow() {
            let result = self.monitor_cycle().await;
            self.record(false, result).await;

            let secs = self.config.snapshot().await.monitor_interval_secs;
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        debug!("Monitor loop stopped");
    }

    /// Single scan iteration.
    async fn scan_cycle(&self, cycle: u64) -> Result<CycleReport> {
        if let Some(watcher) = self.settings.lock().await.as_mut() {
            match watcher.poll(&self.config).await {
                Ok(true) => info!("Settings reloaded"),
                Ok(false) => {}
                Err(e) => warn!(code = e.code(), error = %e, "Settings update rejected"),
            }
        }

        if cycle > 0 && cycle % LEARN_EVERY_CYCLES == 0 {
            if let Err(e) = self.manager.learn().await {
                warn!(error = %e, "Learning failed");
            }
        }

        let signals = self.signals.get_all_signals().await?;
        let report = self.manager.process_signals(signals).await?;
        info!(cycle = cycle, report = %report, "Scan cycle complete");
        Ok(report)
    }

    /// Single monitor iteration.
    async fn monitor_cycle(&self) -> Result<CycleReport> {
        let report = self.manager.monitor_positions().await?;
        if report.evaluated > 0 || report.errors > 0 {
            info!(report = %report, "Monitor cycle complete");
        }

        match self.manager.check_health().await {
            Ok(health) if health.should_pause_trading => {
                warn!(warnings = ?health.warnings, "New entries paused by risk gate")
            }
            Ok(_) => {}
            Err(e) => warn!(code = e.code(), error = %e, "Health check failed"),
        }
        Ok(report)
    }

    async fn record(&self, scan: bool, result: Result<CycleReport>) {
        let open = self.manager.store().list_open().await.map(|p| p.len());
        let mut status = self.status.lock().await;
        let health = if scan { &mut status.scan } else { &mut status.monitor };
        match result {
            Ok(_) => health.record_success(Utc::now()),
            Err(e) => {
                error!(loop_name = if scan { "scan" } else { "monitor" }, error = %e, "Cycle failed");
                health.record_error(e.to_string());
            }
        }
        if let Ok(n) = open {
            status.open_positions = n;
        }
        status.last_trade_at = self.manager.executor().last_trade_at();
        status.updated_at = Utc::now();
        let snapshot = status.clone();
        drop(status);

        if let Err(e) = self.manager.store().save_status(&snapshot).await {
            warn!(error = %e, "Failed to persist status");
        }
    }

    async fn persist_status(&self) {
        let snapshot = self.status.lock().await.clone();
        if let Err(e) = self.manager.store().save_status(&snapshot).await {
            warn!(error = %e, "Failed to persist status");
        }
    }

    pub async fn status(&self) -> BotStatus {
        self.status.lock().await.clone()
    }
}

/// Bot statistics for the `status` command.
#[derive(Debug, Clone)]
pub struct BotStats {
    pub status: Option<BotStatus>,
    pub open_positions: Vec<Position>,
    pub performance: PerformanceSummary,
}

impl BotStats {
    pub async fn load(store: &dyn PositionStore) -> Result<Self> {
        let status = store.load_status().await?;
        let open_positions = store.list_open().await?;
        let history = store.trade_history(i64::MAX).await?;
        Ok(Self {
            status,
            open_positions,
            performance: PerformanceSummary::from_trades(&history),
        })
    }
}

impl std::fmt::Display for BotStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Bot Status ===")?;
        match &self.status {
            Some(s) => {
                let now = Utc::now();
                writeln!(f, "Health:          {}", s.health_label(now))?;
                writeln!(f, "Mode:            {}", if s.paper_trading { "PAPER" } else { "LIVE" })?;
                writeln!(f, "Started:         {}", s.started_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
                for (name, health) in [("Scan", &s.scan), ("Monitor", &s.monitor)] {
                    writeln!(
                        f,
                        "{:<8} last ok: {}  errors in a row: {}{}",
                        name,
                        health
                            .last_success
                            .map(|t| t.format("%H:%M:%S").to_string())
                            .unwrap_or_else(|| "never".to_string()),
                        health.consecutive_errors,
                        health
                            .last_error
                            .as_deref()
                            .map(|e| format!(" ({})", e))
                            .unwrap_or_default()
                    )?;
                }
                if let Some(t) = s.last_trade_at {
                    writeln!(f, "Last trade:      {}", t.format("%Y-%m-%d %H:%M:%S UTC"))?;
                }
            }
            None => writeln!(f, "No bot session found")?,
        }

        writeln!(f, "\n--- Open Positions ({}) ---", self.open_positions.len())?;
        let mut cost = Decimal::ZERO;
        for p in &self.open_positions {
            cost += p.cost_basis();
            writeln!(
                f,
                "  {:<10} qty {:>14} @ ${:<12} peak {:+.1}%",
                p.asset_id,
                p.quantity.round_dp(4),
                p.buy_price,
                p.peak_pnl_percent
            )?;
        }
        writeln!(f, "  Cost basis: ${:.2}", cost)?;
        write!(f, "\n{}", self.performance)
    }
}

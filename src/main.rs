//! Buzz Trader
//!
//! Signal-driven DEX trading engine: scores trending tokens, gates entries on
//! portfolio risk, executes idempotent swaps and manages exits.

mod api;
mod bot;
mod config;
mod db;
mod error;
mod execution;
mod exit;
mod lifecycle;
mod models;
mod risk;
mod scoring;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::bot::{open_store, Bot, BotConfig, BotStats};
use crate::config::{ConfigHandle, SettingsWatcher, TradingConfig};
use crate::risk::PerformanceSummary;
use crate::scoring::OpportunityScorer;

/// Signal-driven DEX trading bot CLI.
#[derive(Parser)]
#[command(name = "buzztrader")]
#[command(about = "Score trending tokens and trade them with managed risk", long_about = None)]
struct Cli {
    /// Database URL
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite:./buzztrader.db?mode=rwc")]
    database: String,

    /// Keep all state in memory (nothing survives a restart)
    #[arg(long)]
    memory: bool,

    /// JSON settings file, re-read when it changes
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG overrides
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the trading loops
    Run {
        /// Route orders to the live venue (requires credentials)
        #[arg(long)]
        live: bool,
    },

    /// Show bot health, open positions and performance
    Status,

    /// Show recent closed trades
    History {
        /// Number of trades to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: i64,
    },

    /// Show effective trading configuration
    Config,

    /// Show what the scorer has learned from trade history
    Insights,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let trading = load_trading_config(cli.settings.as_ref()).await?;
    let bot_config = BotConfig {
        database_url: cli.database.clone(),
        in_memory: cli.memory,
        settings_path: cli.settings.clone(),
        trading,
    };

    match cli.command {
        Commands::Run { live } => {
            let mut bot_config = bot_config;
            if live {
                bot_config.trading.paper_trading = false;
            }

            println!("\n=== Buzz Trader ===");
            println!(
                "Mode:            {}",
                if bot_config.trading.paper_trading { "PAPER" } else { "LIVE (if credentials are set)" }
            );
            println!("Max position:    ${}", bot_config.trading.max_position_usd);
            println!("Scan interval:   {}s", bot_config.trading.scan_interval_secs);
            println!("Monitor interval: {}s", bot_config.trading.monitor_interval_secs);
            println!("\nPress Ctrl+C to stop.\n");

            let store_url = bot_config.database_url.clone();
            let in_memory = bot_config.in_memory;
            let bot = Arc::new(Bot::new(bot_config).await?);

            let (tx, rx) = watch::channel(false);
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutdown signal received, finishing in-flight cycles");
                tx.send(true).ok();
            });

            bot.clone().run(rx).await?;

            if !in_memory {
                info!(database = %store_url, "State saved");
            }
            println!("\n{}", bot.status().await.health_label(chrono::Utc::now()));
        }

        Commands::Status => {
            let store = open_store(&bot_config).await?;
            let stats = BotStats::load(store.as_ref()).await?;
            println!("\n{}", stats);
        }

        Commands::History { limit } => {
            let store = open_store(&bot_config).await?;
            let trades = store.trade_history(limit).await?;

            if trades.is_empty() {
                println!("No closed trades yet.");
                return Ok(());
            }

            println!(
                "\n{:<10} {:<16} {:>12} {:>12} {:>10} {:>8} {:>7} {:<14}",
                "ASSET", "SOURCE", "BUY", "SELL", "PNL $", "PNL %", "HOURS", "EXIT"
            );
            println!("{}", "-".repeat(96));
            for t in &trades {
                println!(
                    "{:<10} {:<16} {:>12} {:>12} {:>10.2} {:>7.1}% {:>7.1} {:<14}",
                    truncate(&t.asset_id, 10),
                    truncate(&t.source, 16),
                    t.buy_price.round_dp(8),
                    t.sell_price.round_dp(8),
                    t.pnl_usd,
                    t.pnl_percent,
                    t.hold_hours(),
                    t.exit_reason.as_str()
                );
            }
            println!("\n{}", PerformanceSummary::from_trades(&trades));
        }

        Commands::Config => {
            let c = &bot_config.trading;

            println!("\n=== Trading Configuration ===\n");
            println!("Exits:");
            println!("  Take Profit:          {}%", c.take_profit_percent);
            println!("  Stop Loss:            {}%", c.stop_loss_percent);

            println!("\nPosition Sizing:");
            println!("  Max Position:         ${}", c.max_position_usd);
            println!("  Min Position:         ${}", c.min_position_usd);
            println!("  Max Open Positions:   {}", c.max_open_positions);

            println!("\nRisk:");
            println!("  Trading Enabled:      {}", c.trading_enabled);
            println!("  Paper Trading:        {}", c.paper_trading);
            println!("  Loss Cooldown:        {}h", c.cooldown_hours);
            println!("  Daily Loss Limit:     ${}", c.daily_loss_limit().round_dp(2));
            println!("  Max Price Impact:     {}%", c.max_price_impact_percent);

            println!("\nMarket Quality:");
            println!("  Min Liquidity:        ${:.0}", c.min_liquidity_usd);
            println!("  Min 24h Volume:       ${:.0}", c.min_volume_24h_usd);
            println!("  Min Trades (1h):      {}", c.min_trades_1h);
            println!("  Dumping Below (1h):   {}%", c.min_change_1h_percent);

            println!("\nSchedule:");
            println!("  Scan Interval:        {}s", c.scan_interval_secs);
            println!("  Monitor Interval:     {}s", c.monitor_interval_secs);
            println!("  Signals per Scan:     {}", c.signal_batch_size);

            if !c.blacklist.is_empty() {
                let list: Vec<&str> = c.blacklist.iter().map(String::as_str).collect();
                println!("\nBlacklist: {}", list.join(", "));
            }
        }

        Commands::Insights => {
            let store = open_store(&bot_config).await?;
            let scorer = OpportunityScorer::new();
            let analyzed = scorer.learn_from_history(store.as_ref()).await?;
            if analyzed == 0 {
                println!("Not enough closed trades to learn from yet (need 10).");
            }
            println!("\n{}", scorer.insights());
        }
    }

    Ok(())
}

/// Defaults with the settings file (if any) applied once.
async fn load_trading_config(settings: Option<&PathBuf>) -> Result<TradingConfig> {
    let handle = ConfigHandle::new(TradingConfig::default());
    if let Some(path) = settings {
        SettingsWatcher::new(path.clone()).poll(&handle).await?;
    }
    Ok(handle.snapshot().await)
}

/// Truncate string with ellipsis.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

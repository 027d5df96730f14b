//! Trading configuration, runtime settings updates and credentials.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{TradeError, TradeResult};

/// Configuration read by every component at decision time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    /// Close when pnl reaches this percent
    pub take_profit_percent: Decimal,

    /// Close when pnl falls to minus this percent
    pub stop_loss_percent: Decimal,

    /// Max notional per position in USD
    pub max_position_usd: Decimal,

    /// Positions smaller than this are not opened
    pub min_position_usd: Decimal,

    pub max_open_positions: usize,

    pub trading_enabled: bool,

    /// Route orders to the simulated router
    pub paper_trading: bool,

    /// Asset symbols or contracts never entered
    pub blacklist: BTreeSet<String>,

    /// Hours an asset sold at a loss is excluded from re-entry
    pub cooldown_hours: i64,

    pub daily_loss_limit_usd: Decimal,
    pub daily_loss_limit_percent: Decimal,
    pub starting_portfolio_usd: Decimal,

    // Market quality gate
    pub min_liquidity_usd: f64,
    pub min_volume_24h_usd: f64,
    pub min_trades_1h: u64,
    /// 1h change below this is treated as dumping
    pub min_change_1h_percent: f64,

    /// Quotes above this price impact are refused
    pub max_price_impact_percent: f64,
    pub buy_slippage_bps: u32,
    pub sell_slippage_bps: u32,

    pub scan_interval_secs: u64,
    pub monitor_interval_secs: u64,

    /// Max signals scored per scan cycle
    pub signal_batch_size: usize,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            take_profit_percent: dec!(15),
            stop_loss_percent: dec!(8),
            max_position_usd: dec!(150),
            min_position_usd: dec!(20),
            max_open_positions: 5,
            trading_enabled: true,
            paper_trading: true,
            blacklist: BTreeSet::new(),
            cooldown_hours: 24,
            daily_loss_limit_usd: dec!(100),
            daily_loss_limit_percent: dec!(20),
            starting_portfolio_usd: dec!(500),
            min_liquidity_usd: 10_000.0,
            min_volume_24h_usd: 10_000.0,
            min_trades_1h: 5,
            min_change_1h_percent: -10.0,
            max_price_impact_percent: 5.0,
            buy_slippage_bps: 100,
            sell_slippage_bps: 500,
            scan_interval_secs: 120,
            monitor_interval_secs: 30,
            signal_batch_size: 10,
        }
    }
}

impl TradingConfig {
    pub fn is_blacklisted(&self, asset_id: &str, contract_ref: &str) -> bool {
        self.blacklist.contains(&asset_id.to_uppercase())
            || (!contract_ref.is_empty() && self.blacklist.contains(contract_ref))
    }

    /// Effective daily loss limit in USD: the tighter of the absolute and
    /// percentage limits.
    pub fn daily_loss_limit(&self) -> Decimal {
        let pct_limit = self.starting_portfolio_usd * self.daily_loss_limit_percent / dec!(100);
        self.daily_loss_limit_usd.min(pct_limit)
    }
}

/// Whitelisted runtime changes. Fields left `None` are untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsUpdate {
    pub take_profit_percent: Option<Decimal>,
    pub stop_loss_percent: Option<Decimal>,
    pub max_position_usd: Option<Decimal>,
    pub min_position_usd: Option<Decimal>,
    pub trading_enabled: Option<bool>,
    pub paper_trading: Option<bool>,
    pub max_open_positions: Option<usize>,
    #[serde(default)]
    pub blacklist_add: Vec<String>,
    #[serde(default)]
    pub blacklist_remove: Vec<String>,
}

impl SettingsUpdate {
    /// Validate and apply onto `config`. Nothing is changed on error.
    pub fn apply(&self, config: &mut TradingConfig) -> TradeResult<Vec<&'static str>> {
        let mut next = config.clone();
        let mut changed = Vec::new();

        if let Some(tp) = self.take_profit_percent {
            if tp <= Decimal::ZERO || tp > dec!(1000) {
                return Err(TradeError::Config(format!("take_profit_percent out of range: {}", tp)));
            }
            next.take_profit_percent = tp;
            changed.push("take_profit_percent");
        }
        if let Some(sl) = self.stop_loss_percent {
            if sl <= Decimal::ZERO || sl >= dec!(100) {
                return Err(TradeError::Config(format!("stop_loss_percent out of range: {}", sl)));
            }
            next.stop_loss_percent = sl;
            changed.push("stop_loss_percent");
        }
        if let Some(max) = self.max_position_usd {
            if max <= Decimal::ZERO {
                return Err(TradeError::Config(format!("max_position_usd must be positive: {}", max)));
            }
            next.max_position_usd = max;
            changed.push("max_position_usd");
        }
        if let Some(min) = self.min_position_usd {
            if min < Decimal::ZERO {
                return Err(TradeError::Config(format!("min_position_usd must not be negative: {}", min)));
            }
            next.min_position_usd = min;
            changed.push("min_position_usd");
        }
        if next.min_position_usd > next.max_position_usd {
            return Err(TradeError::Config(format!(
                "min_position_usd {} exceeds max_position_usd {}",
                next.min_position_usd, next.max_position_usd
            )));
        }
        if let Some(enabled) = self.trading_enabled {
            next.trading_enabled = enabled;
            changed.push("trading_enabled");
        }
        if let Some(paper) = self.paper_trading {
            next.paper_trading = paper;
            changed.push("paper_trading");
        }
        if let Some(max_open) = self.max_open_positions {
            if max_open == 0 || max_open > 50 {
                return Err(TradeError::Config(format!("max_open_positions out of range: {}", max_open)));
            }
            next.max_open_positions = max_open;
            changed.push("max_open_positions");
        }
        for asset in &self.blacklist_add {
            next.blacklist.insert(normalize_blacklist_entry(asset));
        }
        for asset in &self.blacklist_remove {
            next.blacklist.remove(&normalize_blacklist_entry(asset));
        }
        if !self.blacklist_add.is_empty() || !self.blacklist_remove.is_empty() {
            changed.push("blacklist");
        }

        *config = next;
        Ok(changed)
    }
}

/// Symbols are stored uppercased; contract addresses are case-sensitive and
/// kept as given.
fn normalize_blacklist_entry(entry: &str) -> String {
    let trimmed = entry.trim();
    if trimmed.len() <= 12 {
        trimmed.to_uppercase()
    } else {
        trimmed.to_string()
    }
}

/// Shared, hot-reloadable configuration.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<TradingConfig>>,
}

impl ConfigHandle {
    pub fn new(config: TradingConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Copy of the current configuration.
    pub async fn snapshot(&self) -> TradingConfig {
        self.inner.read().await.clone()
    }

    pub async fn apply(&self, update: &SettingsUpdate) -> TradeResult<Vec<&'static str>> {
        let mut config = self.inner.write().await;
        update.apply(&mut config)
    }
}

/// Re-reads a JSON settings file when its modification time changes.
pub struct SettingsWatcher {
    path: PathBuf,
    last_modified: Option<SystemTime>,
}

impl SettingsWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_modified: None,
        }
    }

    /// Apply the file if it changed since the last poll.
    /// Returns true when an update was applied.
    pub async fn poll(&mut self, handle: &ConfigHandle) -> TradeResult<bool> {
        let modified = tokio::fs::metadata(&self.path)
            .await
            .and_then(|m| m.modified())
            .map_err(|e| TradeError::Config(format!("settings file {}: {}", self.path.display(), e)))?;

        if self.last_modified == Some(modified) {
            return Ok(false);
        }
        self.last_modified = Some(modified);

        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| TradeError::Config(format!("settings file {}: {}", self.path.display(), e)))?;
        let update: SettingsUpdate = serde_json::from_str(&raw)
            .map_err(|e| TradeError::Config(format!("invalid settings file: {}", e)))?;

        let changed = handle.apply(&update).await?;
        if !changed.is_empty() {
            info!(path = %self.path.display(), fields = ?changed, "Settings reloaded");
        }
        Ok(true)
    }
}

// ==================== Credentials ====================

const DEFAULT_ROUTER_URL: &str = "https://public.jupiterapi.com";
const DEFAULT_SOLANA_RPC: &str = "https://api.mainnet-beta.solana.com";

/// Credentials for live order routing, loaded from the environment.
#[derive(Debug, Clone)]
pub struct LiveCredentials {
    pub router_url: String,
    pub signer_url: String,
    pub signer_api_key: String,
    pub wallet_address: String,
    pub rpc_url: String,
}

impl LiveCredentials {
    /// Load from `ROUTER_URL`, `SIGNER_URL`, `SIGNER_API_KEY`,
    /// `WALLET_ADDRESS` and `SOLANA_RPC_URL`.
    pub fn from_env() -> TradeResult<Self> {
        let required = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| TradeError::Config(format!("{} not set", name)))
        };

        Ok(Self {
            router_url: std::env::var("ROUTER_URL").unwrap_or_else(|_| DEFAULT_ROUTER_URL.to_string()),
            signer_url: required("SIGNER_URL")?,
            signer_api_key: required("SIGNER_API_KEY")?,
            wallet_address: required("WALLET_ADDRESS")?,
            rpc_url: rpc_url_from_env(),
        })
    }
}

pub fn rpc_url_from_env() -> String {
    std::env::var("SOLANA_RPC_URL").unwrap_or_else(|_| DEFAULT_SOLANA_RPC.to_string())
}

/// Credentials for the advisory exit collaborator.
#[derive(Debug, Clone)]
pub struct AdvisorCredentials {
    pub url: String,
    pub api_key: String,
    pub model: String,
}

impl AdvisorCredentials {
    /// `None` when `ADVISOR_API_KEY` is unset; the deterministic fallback is
    /// used instead.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("ADVISOR_API_KEY").ok().filter(|k| !k.is_empty());
        match api_key {
            Some(api_key) => Some(Self {
                url: std::env::var("ADVISOR_URL")
                    .unwrap_or_else(|_| "https://api.anthropic.com/v1/messages".to_string()),
                api_key,
                model: std::env::var("ADVISOR_MODEL").unwrap_or_else(|_| "claude-3-5-haiku-latest".to_string()),
            }),
            None => {
                warn!("ADVISOR_API_KEY not set, advisory exits use the fallback rule");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TradingConfig::default();
        assert_eq!(config.take_profit_percent, dec!(15));
        assert_eq!(config.stop_loss_percent, dec!(8));
        assert_eq!(config.max_open_positions, 5);
        assert!(config.paper_trading);
        // $100 vs 20% of $500
        assert_eq!(config.daily_loss_limit(), dec!(100));
    }

    #[test]
    fn test_update_applies_whitelisted_fields() {
        let mut config = TradingConfig::default();
        let update = SettingsUpdate {
            take_profit_percent: Some(dec!(25)),
            blacklist_add: vec!["scam".to_string()],
            ..Default::default()
        };
        let changed = update.apply(&mut config).unwrap();
        assert_eq!(changed, vec!["take_profit_percent", "blacklist"]);
        assert_eq!(config.take_profit_percent, dec!(25));
        assert!(config.is_blacklisted("SCAM", ""));
    }

    #[test]
    fn test_invalid_update_leaves_config_untouched() {
        let mut config = TradingConfig::default();
        let update = SettingsUpdate {
            take_profit_percent: Some(dec!(30)),
            min_position_usd: Some(dec!(500)),
            ..Default::default()
        };
        let err = update.apply(&mut config).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
        assert_eq!(config, TradingConfig::default());
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let result: Result<SettingsUpdate, _> = serde_json::from_str(r#"{"starting_portfolio_usd": "1"}"#);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_settings_watcher_applies_once() {
        let path = std::env::temp_dir().join(format!("buzz-settings-{}.json", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, r#"{"stop_loss_percent": "12", "trading_enabled": false}"#)
            .await
            .unwrap();

        let handle = ConfigHandle::new(TradingConfig::default());
        let mut watcher = SettingsWatcher::new(&path);
        assert!(watcher.poll(&handle).await.unwrap());
        assert!(!watcher.poll(&handle).await.unwrap());

        let config = handle.snapshot().await;
        assert_eq!(config.stop_loss_percent, dec!(12));
        assert!(!config.trading_enabled);

        let _ = tokio::fs::remove_file(&path).await;
    }
}

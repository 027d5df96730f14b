//! DexScreener client: boosted-token signal feed and pair-based market data.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

use super::{parse_price, MarketDataProvider, SignalSource, DATA_TIMEOUT};
use crate::models::{Signal, TokenData};

const DEXSCREENER_BASE: &str = "https://api.dexscreener.com";
const CHAIN: &str = "solana";

/// How long a market data response stays fresh.
pub const MARKET_CACHE_TTL: Duration = Duration::from_secs(120);

// ==================== Wire types ====================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Boost {
    #[serde(default)]
    chain_id: String,
    #[serde(default)]
    token_address: String,
    #[serde(default)]
    total_amount: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PairsResponse {
    #[serde(default)]
    pairs: Option<Vec<Pair>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Pair {
    #[serde(default)]
    chain_id: String,
    #[serde(default)]
    base_token: BaseToken,
    #[serde(default)]
    price_usd: Option<String>,
    #[serde(default)]
    liquidity: Option<Liquidity>,
    #[serde(default)]
    volume: Option<Windows>,
    #[serde(default)]
    price_change: Option<Windows>,
    #[serde(default)]
    txns: Option<Txns>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct BaseToken {
    #[serde(default)]
    address: String,
    #[serde(default)]
    symbol: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Liquidity {
    #[serde(default)]
    usd: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Windows {
    #[serde(default)]
    m5: Option<f64>,
    #[serde(default)]
    h1: Option<f64>,
    #[serde(default)]
    h24: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Txns {
    #[serde(default)]
    h1: Option<TxnCount>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TxnCount {
    #[serde(default)]
    buys: u64,
    #[serde(default)]
    sells: u64,
}

impl Pair {
    fn liquidity_usd(&self) -> f64 {
        self.liquidity.as_ref().and_then(|l| l.usd).unwrap_or(0.0)
    }

    fn to_token_data(&self) -> TokenData {
        let volume = self.volume.clone().unwrap_or_default();
        let change = self.price_change.clone().unwrap_or_default();
        let h1 = self.txns.as_ref().and_then(|t| t.h1.clone()).unwrap_or_default();

        TokenData {
            price: self.price_usd.as_deref().map(parse_price).unwrap_or_default(),
            liquidity: self.liquidity_usd(),
            volume_24h: volume.h24.unwrap_or(0.0),
            volume_1h: volume.h1.unwrap_or(0.0),
            change_5m: change.m5.unwrap_or(0.0),
            change_1h: change.h1.unwrap_or(0.0),
            change_24h: change.h24.unwrap_or(0.0),
            buys_1h: h1.buys,
            sells_1h: h1.sells,
        }
    }
}

/// Contract addresses are long base58 strings; anything short is a symbol.
fn is_contract_ref(asset_ref: &str) -> bool {
    asset_ref.len() >= 32
}

/// Deepest pair on the trading chain matching the asset.
fn best_pair<'a>(pairs: &'a [Pair], asset_ref: &str) -> Option<&'a Pair> {
    let by_contract = is_contract_ref(asset_ref);
    pairs
        .iter()
        .filter(|p| p.chain_id.is_empty() || p.chain_id == CHAIN)
        .filter(|p| {
            if by_contract {
                p.base_token.address == asset_ref
            } else {
                p.base_token.symbol.eq_ignore_ascii_case(asset_ref)
            }
        })
        .max_by(|a, b| a.liquidity_usd().total_cmp(&b.liquidity_usd()))
}

fn http_client() -> Result<Client> {
    Client::builder()
        .timeout(DATA_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

// ==================== Signal feed ====================

/// Top boosted tokens on the trading chain.
pub struct DexScreenerSignals {
    client: Client,
    base_url: String,
    limit: usize,
}

impl DexScreenerSignals {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: DEXSCREENER_BASE.to_string(),
            limit: 20,
        })
    }
}

#[async_trait]
impl SignalSource for DexScreenerSignals {
    fn name(&self) -> &'static str {
        "dex_boosted"
    }

    async fn fetch_signals(&self) -> Result<Vec<Signal>> {
        let url = format!("{}/token-boosts/top/v1", self.base_url);
        debug!(url = %url, "Fetching boosted tokens");

        let response = self.client.get(&url).send().await.context("Failed to fetch boosts")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Boosts request failed: {} - {}", status, body);
        }

        let boosts: Vec<Boost> = response.json().await.context("Failed to parse boosts")?;

        Ok(boosts
            .into_iter()
            .take(self.limit)
            .filter(|b| b.chain_id == CHAIN && !b.token_address.is_empty())
            .map(|b| {
                let label: String = b.token_address.chars().take(8).collect();
                let amount = b.total_amount.unwrap_or(0.0);
                let mut signal = Signal::new(label, b.token_address, self.name());
                signal.market_snapshot.mentions = amount.max(0.0) as u64;
                signal.raw_factors.insert("boost_amount".to_string(), amount);
                signal
            })
            .collect())
    }
}

// ==================== Market data ====================

/// Pair-based market data with a per-asset TTL cache.
pub struct DexScreenerMarket {
    client: Client,
    base_url: String,
    cache: RwLock<HashMap<String, (Instant, TokenData)>>,
    ttl: Duration,
}

impl DexScreenerMarket {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: DEXSCREENER_BASE.to_string(),
            cache: RwLock::new(HashMap::new()),
            ttl: MARKET_CACHE_TTL,
        })
    }

    async fn fetch(&self, asset_ref: &str) -> Result<TokenData> {
        let url = if is_contract_ref(asset_ref) {
            format!("{}/latest/dex/tokens/{}", self.base_url, asset_ref)
        } else {
            format!("{}/latest/dex/search?q={}", self.base_url, asset_ref)
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch pairs")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Pairs request failed: {} - {}", status, body);
        }

        let body: PairsResponse = response.json().await.context("Failed to parse pairs")?;
        let pairs = body.pairs.unwrap_or_default();
        Ok(best_pair(&pairs, asset_ref).map(Pair::to_token_data).unwrap_or_default())
    }
}

#[async_trait]
impl MarketDataProvider for DexScreenerMarket {
    async fn get_token_data(&self, asset_ref: &str) -> TokenData {
        if let Some((at, data)) = self.cache.read().await.get(asset_ref) {
            if at.elapsed() < self.ttl {
                return data.clone();
            }
        }

        match self.fetch(asset_ref).await {
            Ok(data) => {
                // Empty responses are not cached so the next cycle retries
                if data.has_price() {
                    self.cache
                        .write()
                        .await
                        .insert(asset_ref.to_string(), (Instant::now(), data.clone()));
                }
                data
            }
            Err(e) => {
                debug!(asset = %asset_ref, error = %e, "Market data unavailable");
                TokenData::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const PAIRS: &str = r#"{
        "pairs": [
            {
                "chainId": "solana",
                "baseToken": {"address": "FooMint1111111111111111111111111111111111", "symbol": "FOO"},
                "priceUsd": "0.0123",
                "liquidity": {"usd": 5000},
                "volume": {"h1": 100, "h24": 2000},
                "priceChange": {"m5": 1.0, "h1": 2.0, "h24": 3.0},
                "txns": {"h1": {"buys": 4, "sells": 1}}
            },
            {
                "chainId": "solana",
                "baseToken": {"address": "FooMint1111111111111111111111111111111111", "symbol": "FOO"},
                "priceUsd": "0.0125",
                "liquidity": {"usd": 90000},
                "volume": {"h1": 1500, "h24": 40000},
                "priceChange": {"m5": 0.5, "h1": 6.5, "h24": 42.0},
                "txns": {"h1": {"buys": 120, "sells": 45}}
            },
            {
                "chainId": "ethereum",
                "baseToken": {"address": "0xfoo", "symbol": "FOO"},
                "priceUsd": "9.99",
                "liquidity": {"usd": 9000000}
            }
        ]
    }"#;

    #[test]
    fn test_best_pair_by_symbol_prefers_deepest_on_chain() {
        let body: PairsResponse = serde_json::from_str(PAIRS).unwrap();
        let pairs = body.pairs.unwrap();

        let data = best_pair(&pairs, "foo").unwrap().to_token_data();
        assert_eq!(data.price, dec!(0.0125));
        assert_eq!(data.liquidity, 90_000.0);
        assert_eq!(data.volume_1h, 1500.0);
        assert_eq!(data.change_1h, 6.5);
        assert_eq!(data.trades_1h(), 165);
    }

    #[test]
    fn test_best_pair_by_contract() {
        let body: PairsResponse = serde_json::from_str(PAIRS).unwrap();
        let pairs = body.pairs.unwrap();

        assert!(best_pair(&pairs, "FooMint1111111111111111111111111111111111").is_some());
        assert!(best_pair(&pairs, "BarMint1111111111111111111111111111111111").is_none());
    }

    #[test]
    fn test_null_pairs_is_no_data() {
        let body: PairsResponse = serde_json::from_str(r#"{"schemaVersion":"1.0.0","pairs":null}"#).unwrap();
        let pairs = body.pairs.unwrap_or_default();
        let data = best_pair(&pairs, "FOO").map(Pair::to_token_data).unwrap_or_default();
        assert!(!data.has_price());
    }

    #[test]
    fn test_boost_parsing() {
        let boosts: Vec<Boost> = serde_json::from_str(
            r#"[{"url":"x","chainId":"solana","tokenAddress":"AbCdEfGh123","totalAmount":500},
                {"chainId":"base","tokenAddress":"0x1"}]"#,
        )
        .unwrap();
        assert_eq!(boosts.len(), 2);
        assert_eq!(boosts[0].total_amount, Some(500.0));
        assert_eq!(boosts[1].total_amount, None);
    }
}

//! CoinGecko trending search as a signal feed.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{SignalSource, DATA_TIMEOUT};
use crate::models::Signal;

const GECKO_BASE: &str = "https://api.coingecko.com/api/v3";

#[derive(Debug, Deserialize)]
struct TrendingResponse {
    #[serde(default)]
    coins: Vec<TrendingCoin>,
}

#[derive(Debug, Deserialize)]
struct TrendingCoin {
    item: TrendingItem,
}

#[derive(Debug, Deserialize)]
struct TrendingItem {
    #[serde(default)]
    symbol: String,
    /// Zero-based trending rank
    #[serde(default)]
    score: u32,
    #[serde(default)]
    market_cap_rank: Option<u32>,
}

/// Mention-equivalent for a trending rank: rank 0 counts as 500, each
/// following rank 50 less.
fn rank_mentions(rank: u32) -> u64 {
    500u64.saturating_sub(rank as u64 * 50).max(50)
}

pub struct GeckoTrendingSignals {
    client: Client,
    base_url: String,
}

impl GeckoTrendingSignals {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(DATA_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: GECKO_BASE.to_string(),
        })
    }

    fn to_signals(&self, body: TrendingResponse) -> Vec<Signal> {
        body.coins
            .into_iter()
            .take(10)
            .filter(|c| !c.item.symbol.is_empty())
            .map(|c| {
                let mut signal = Signal::new(&c.item.symbol, "", self.name());
                signal.market_snapshot.mentions = rank_mentions(c.item.score);
                signal.raw_factors.insert("trending_rank".to_string(), c.item.score as f64);
                if let Some(rank) = c.item.market_cap_rank {
                    signal.raw_factors.insert("market_cap_rank".to_string(), rank as f64);
                }
                signal
            })
            .collect()
    }
}

#[async_trait]
impl SignalSource for GeckoTrendingSignals {
    fn name(&self) -> &'static str {
        "gecko_trending"
    }

    async fn fetch_signals(&self) -> Result<Vec<Signal>> {
        let url = format!("{}/search/trending", self.base_url);
        debug!(url = %url, "Fetching trending coins");

        let response = self.client.get(&url).send().await.context("Failed to fetch trending")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Trending request failed: {} - {}", status, body);
        }

        let body: TrendingResponse = response.json().await.context("Failed to parse trending")?;
        Ok(self.to_signals(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trending_to_signals() {
        let body: TrendingResponse = serde_json::from_str(
            r#"{"coins":[
                {"item":{"symbol":"wif","score":0,"market_cap_rank":40}},
                {"item":{"symbol":"","score":1}},
                {"item":{"symbol":"bonk","score":3}}
            ]}"#,
        )
        .unwrap();

        let feed = GeckoTrendingSignals::new().unwrap();
        let signals = feed.to_signals(body);
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].asset_id, "WIF");
        assert_eq!(signals[0].market_snapshot.mentions, 500);
        assert_eq!(signals[0].raw_factors["market_cap_rank"], 40.0);
        assert_eq!(signals[1].market_snapshot.mentions, 350);
        assert_eq!(signals[1].source, "gecko_trending");
    }

    #[test]
    fn test_rank_mentions_floor() {
        assert_eq!(rank_mentions(20), 50);
    }
}

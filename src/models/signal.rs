//! Opportunity signals and the market data attached to them.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Market snapshot used by the scorer.
///
/// Social fields come from the signal source; market fields are refreshed
/// from the market data provider before scoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    /// Social mentions (or source score) summed across sources
    #[serde(default)]
    pub mentions: u64,

    /// Number of distinct sources reporting the asset
    #[serde(default = "default_sources")]
    pub num_sources: u32,

    /// Hours since the asset was first seen / launched
    #[serde(default = "default_age")]
    pub age_hours: f64,

    #[serde(default)]
    pub change_5m: f64,
    #[serde(default)]
    pub change_1h: f64,
    #[serde(default)]
    pub change_24h: f64,
    #[serde(default)]
    pub volume_24h: f64,
    #[serde(default)]
    pub volume_1h: f64,
    #[serde(default)]
    pub liquidity: f64,
    #[serde(default)]
    pub buys_1h: u64,
    #[serde(default)]
    pub sells_1h: u64,
}

fn default_sources() -> u32 {
    1
}

fn default_age() -> f64 {
    24.0
}

impl MarketSnapshot {
    /// Overlay live market fields, keeping the social fields.
    pub fn with_market(&self, data: &TokenData) -> Self {
        Self {
            mentions: self.mentions,
            num_sources: self.num_sources,
            age_hours: self.age_hours,
            change_5m: data.change_5m,
            change_1h: data.change_1h,
            change_24h: data.change_24h,
            volume_24h: data.volume_24h,
            volume_1h: data.volume_1h,
            liquidity: data.liquidity,
            buys_1h: data.buys_1h,
            sells_1h: data.sells_1h,
        }
    }
}

/// A candidate trading opportunity produced by the signal source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Asset symbol (uppercased)
    pub asset_id: String,

    /// On-chain contract / mint address, empty when unknown
    #[serde(default)]
    pub contract_ref: String,

    /// Source that produced the strongest report
    pub source: String,

    /// Raw numeric factors reported by the source
    #[serde(default)]
    pub raw_factors: HashMap<String, f64>,

    #[serde(default)]
    pub market_snapshot: MarketSnapshot,

    #[serde(default = "Utc::now")]
    pub discovered_at: DateTime<Utc>,
}

impl Signal {
    pub fn new(asset_id: impl Into<String>, contract_ref: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            asset_id: asset_id.into().to_uppercase(),
            contract_ref: contract_ref.into(),
            source: source.into(),
            raw_factors: HashMap::new(),
            market_snapshot: MarketSnapshot::default(),
            discovered_at: Utc::now(),
        }
    }

    /// Identity used for deduplication. Contract addresses win over
    /// symbols because symbols collide across chains and copycat tokens.
    pub fn identity(&self) -> String {
        if self.contract_ref.is_empty() {
            format!("sym:{}", self.asset_id.to_uppercase())
        } else {
            format!("ca:{}", self.contract_ref)
        }
    }

    /// Reference handed to the order router.
    pub fn order_ref(&self) -> &str {
        if self.contract_ref.is_empty() {
            &self.asset_id
        } else {
            &self.contract_ref
        }
    }
}

/// Merge signals that refer to the same asset.
///
/// Mentions are summed, the youngest age is kept, the source with the
/// largest individual mention count becomes the signal's source, and
/// `num_sources` counts distinct reporting sources.
pub fn dedupe_signals(signals: Vec<Signal>) -> Vec<Signal> {
    let mut order: Vec<String> = Vec::new();
    let mut merged: HashMap<String, (Signal, u64, HashSet<String>)> = HashMap::new();

    for signal in signals {
        let key = signal.identity();
        let mentions = signal.market_snapshot.mentions;

        match merged.get_mut(&key) {
            Some((existing, best_mentions, sources)) => {
                sources.insert(signal.source.clone());
                existing.market_snapshot.mentions += mentions;
                existing.market_snapshot.age_hours =
                    existing.market_snapshot.age_hours.min(signal.market_snapshot.age_hours);
                if mentions > *best_mentions {
                    *best_mentions = mentions;
                    existing.source = signal.source.clone();
                }
                if existing.discovered_at > signal.discovered_at {
                    existing.discovered_at = signal.discovered_at;
                }
                for (k, v) in signal.raw_factors {
                    existing.raw_factors.entry(k).or_insert(v);
                }
            }
            None => {
                let mut sources = HashSet::new();
                sources.insert(signal.source.clone());
                order.push(key.clone());
                merged.insert(key, (signal, mentions, sources));
            }
        }
    }

    order
        .into_iter()
        .filter_map(|key| merged.remove(&key))
        .map(|(mut signal, _, sources)| {
            signal.market_snapshot.num_sources = sources.len() as u32;
            signal
        })
        .collect()
}

/// Live market data for an asset. All-zero means "no data".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenData {
    pub price: Decimal,
    pub liquidity: f64,
    pub volume_24h: f64,
    pub volume_1h: f64,
    pub change_5m: f64,
    pub change_1h: f64,
    pub change_24h: f64,
    pub buys_1h: u64,
    pub sells_1h: u64,
}

impl TokenData {
    /// Whether a usable price is present.
    pub fn has_price(&self) -> bool {
        self.price > Decimal::ZERO
    }

    pub fn trades_1h(&self) -> u64 {
        self.buys_1h + self.sells_1h
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(asset: &str, contract: &str, source: &str, mentions: u64, age: f64) -> Signal {
        let mut s = Signal::new(asset, contract, source);
        s.market_snapshot.mentions = mentions;
        s.market_snapshot.age_hours = age;
        s
    }

    #[test]
    fn test_dedupe_prefers_contract_identity() {
        // Same symbol, different contracts: two distinct assets
        let merged = dedupe_signals(vec![
            signal("PEPE", "mintA", "dex_boosted", 100, 5.0),
            signal("PEPE", "mintB", "gecko_trending", 50, 3.0),
        ]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_dedupe_merges_sources() {
        let merged = dedupe_signals(vec![
            signal("FOO", "mintF", "dex_boosted", 100, 5.0),
            signal("FOO", "mintF", "gecko_trending", 300, 2.0),
            signal("BAR", "", "gecko_trending", 10, 30.0),
        ]);
        assert_eq!(merged.len(), 2);

        let foo = &merged[0];
        assert_eq!(foo.asset_id, "FOO");
        assert_eq!(foo.market_snapshot.mentions, 400);
        assert_eq!(foo.market_snapshot.num_sources, 2);
        assert_eq!(foo.market_snapshot.age_hours, 2.0);
        assert_eq!(foo.source, "gecko_trending");
        assert_eq!(merged[1].order_ref(), "BAR");
    }

    #[test]
    fn test_snapshot_overlay_keeps_social_fields() {
        let mut snap = MarketSnapshot::default();
        snap.mentions = 250;
        snap.num_sources = 3;
        let data = TokenData {
            liquidity: 120_000.0,
            buys_1h: 40,
            sells_1h: 10,
            ..Default::default()
        };
        let merged = snap.with_market(&data);
        assert_eq!(merged.mentions, 250);
        assert_eq!(merged.num_sources, 3);
        assert_eq!(merged.liquidity, 120_000.0);
        assert_eq!(merged.buys_1h, 40);
    }
}

//! The eight scoring factors and their bucket tables.
//!
//! Every factor maps a market snapshot to a score in [0, 100] through a fixed
//! threshold table so results stay auditable.

use serde::Serialize;

use crate::models::MarketSnapshot;

/// Scoring factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Factor {
    Buzz,
    MultiSource,
    SocialVelocity,
    PriceMomentum,
    VolumeSurge,
    LiquidityHealth,
    BuyPressure,
    Freshness,
}

impl Factor {
    pub const COUNT: usize = 8;

    pub const ALL: [Factor; Factor::COUNT] = [
        Factor::Buzz,
        Factor::MultiSource,
        Factor::SocialVelocity,
        Factor::PriceMomentum,
        Factor::VolumeSurge,
        Factor::LiquidityHealth,
        Factor::BuyPressure,
        Factor::Freshness,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Factor::Buzz => "buzz",
            Factor::MultiSource => "multi_source",
            Factor::SocialVelocity => "social_velocity",
            Factor::PriceMomentum => "price_momentum",
            Factor::VolumeSurge => "volume_surge",
            Factor::LiquidityHealth => "liquidity_health",
            Factor::BuyPressure => "buy_pressure",
            Factor::Freshness => "freshness",
        }
    }

    /// Score this factor for a snapshot.
    pub fn score(self, m: &MarketSnapshot) -> f64 {
        match self {
            Factor::Buzz => buzz(m.mentions),
            Factor::MultiSource => multi_source(m.num_sources),
            Factor::SocialVelocity => social_velocity(m.age_hours),
            Factor::PriceMomentum => price_momentum(m.change_5m, m.change_1h, m.change_24h),
            Factor::VolumeSurge => volume_surge(m.volume_1h, m.volume_24h),
            Factor::LiquidityHealth => liquidity_health(m.liquidity),
            Factor::BuyPressure => buy_pressure(m.buys_1h, m.sells_1h),
            Factor::Freshness => freshness(m.age_hours),
        }
    }
}

/// Value per factor, indexed by [`Factor`]. Every factor always has a value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FactorMap([f64; Factor::COUNT]);

impl FactorMap {
    pub fn get(&self, factor: Factor) -> f64 {
        self.0[factor.index()]
    }

    pub fn set(&mut self, factor: Factor, value: f64) {
        self.0[factor.index()] = value;
    }

    pub fn iter(&self) -> impl Iterator<Item = (Factor, f64)> + '_ {
        Factor::ALL.iter().map(move |f| (*f, self.get(*f)))
    }

    pub fn sum(&self) -> f64 {
        self.0.iter().sum()
    }

    /// Score every factor for `snapshot`.
    pub fn score(snapshot: &MarketSnapshot) -> Self {
        let mut scores = [0.0; Factor::COUNT];
        for factor in Factor::ALL {
            scores[factor.index()] = factor.score(snapshot);
        }
        FactorMap(scores)
    }

    /// Weighted sum against a weight map.
    pub fn weighted(&self, weights: &FactorMap) -> f64 {
        self.iter().map(|(f, v)| v * weights.get(f)).sum()
    }
}

impl Serialize for FactorMap {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(Factor::COUNT))?;
        for (factor, value) in self.iter() {
            map.serialize_entry(factor.name(), &value)?;
        }
        map.end()
    }
}

/// Default weights. Sum to 1.0.
pub const DEFAULT_WEIGHTS: FactorMap = FactorMap([
    0.20, // buzz
    0.10, // multi_source
    0.10, // social_velocity
    0.15, // price_momentum
    0.15, // volume_surge
    0.10, // liquidity_health
    0.10, // buy_pressure
    0.10, // freshness
]);

// ==================== Bucket tables ====================

fn buzz(mentions: u64) -> f64 {
    match mentions {
        m if m >= 500 => 100.0,
        m if m >= 300 => 80.0,
        m if m >= 200 => 60.0,
        m => (m as f64 / 5.0).max(20.0),
    }
}

fn multi_source(sources: u32) -> f64 {
    match sources {
        s if s >= 4 => 100.0,
        s if s >= 2 => 60.0,
        _ => 30.0,
    }
}

fn social_velocity(age_hours: f64) -> f64 {
    if age_hours < 2.0 {
        100.0
    } else if age_hours < 6.0 {
        80.0
    } else if age_hours < 12.0 {
        50.0
    } else {
        20.0
    }
}

/// Rewards steady climbs; a 24h move beyond 100% is penalized as a likely top.
fn price_momentum(change_5m: f64, change_1h: f64, change_24h: f64) -> f64 {
    let mut score: f64 = 0.0;
    if (5.0..=30.0).contains(&change_5m) {
        score += 40.0;
    }
    if (10.0..=50.0).contains(&change_1h) {
        score += 35.0;
    }
    if (20.0..=100.0).contains(&change_24h) {
        score += 25.0;
    } else if change_24h > 100.0 {
        score -= 20.0;
    }
    score.clamp(0.0, 100.0)
}

fn volume_surge(volume_1h: f64, volume_24h: f64) -> f64 {
    if volume_1h <= 0.0 || volume_24h <= 0.0 {
        return 30.0;
    }
    let hourly_avg = volume_24h / 24.0;
    if volume_1h > hourly_avg * 3.0 {
        100.0
    } else if volume_1h > hourly_avg * 1.5 {
        70.0
    } else {
        40.0
    }
}

fn liquidity_health(liquidity: f64) -> f64 {
    if liquidity >= 500_000.0 {
        100.0
    } else if liquidity >= 200_000.0 {
        80.0
    } else if liquidity >= 100_000.0 {
        60.0
    } else if liquidity >= 50_000.0 {
        40.0
    } else {
        20.0
    }
}

fn buy_pressure(buys: u64, sells: u64) -> f64 {
    let total = buys + sells;
    if total == 0 {
        return 40.0;
    }
    let ratio = buys as f64 / total as f64;
    if ratio > 0.65 {
        100.0
    } else if ratio > 0.55 {
        70.0
    } else if ratio > 0.45 {
        50.0
    } else {
        20.0
    }
}

fn freshness(age_hours: f64) -> f64 {
    if age_hours < 6.0 {
        100.0
    } else if age_hours < 24.0 {
        70.0
    } else if age_hours < 72.0 {
        40.0
    } else {
        20.0
    }
}

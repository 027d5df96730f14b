//! Health of the two trading loops, persisted for the `status` command.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Consecutive failures at which a loop is considered critical.
pub const CRITICAL_ERROR_STREAK: u32 = 5;

/// Scan loop silence after which health is critical.
pub const SCAN_STALE_MINUTES: i64 = 10;

/// Per-loop health counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoopHealth {
    pub last_success: Option<DateTime<Utc>>,
    pub consecutive_errors: u32,
    pub last_error: Option<String>,
    pub cycles: u64,
}

impl LoopHealth {
    pub fn record_success(&mut self, at: DateTime<Utc>) {
        self.last_success = Some(at);
        self.consecutive_errors = 0;
        self.last_error = None;
        self.cycles += 1;
    }

    pub fn record_error(&mut self, error: impl Into<String>) {
        self.consecutive_errors += 1;
        self.last_error = Some(error.into());
        self.cycles += 1;
    }
}

/// Snapshot of the running bot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotStatus {
    pub running: bool,
    pub paper_trading: bool,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub scan: LoopHealth,
    pub monitor: LoopHealth,
    pub open_positions: usize,
    pub last_trade_at: Option<DateTime<Utc>>,
}

impl BotStatus {
    pub fn new(paper_trading: bool) -> Self {
        let now = Utc::now();
        Self {
            running: true,
            paper_trading,
            started_at: now,
            updated_at: now,
            scan: LoopHealth::default(),
            monitor: LoopHealth::default(),
            open_positions: 0,
            last_trade_at: None,
        }
    }

    /// Critical when either loop keeps failing or the scan loop has not
    /// succeeded recently.
    pub fn is_critical_at(&self, now: DateTime<Utc>) -> bool {
        if self.scan.consecutive_errors >= CRITICAL_ERROR_STREAK
            || self.monitor.consecutive_errors >= CRITICAL_ERROR_STREAK
        {
            return true;
        }
        let reference = self.scan.last_success.unwrap_or(self.started_at);
        self.running && now - reference > Duration::minutes(SCAN_STALE_MINUTES)
    }

    pub fn health_label(&self, now: DateTime<Utc>) -> &'static str {
        if !self.running {
            "stopped"
        } else if self.is_critical_at(now) {
            "critical"
        } else if self.scan.consecutive_errors > 0 || self.monitor.consecutive_errors > 0 {
            "degraded"
        } else {
            "healthy"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_streak_is_critical() {
        let now = Utc::now();
        let mut status = BotStatus::new(true);
        status.scan.record_success(now);
        for _ in 0..4 {
            status.monitor.record_error("rpc down");
        }
        assert_eq!(status.health_label(now), "degraded");

        status.monitor.record_error("rpc down");
        assert_eq!(status.health_label(now), "critical");

        status.monitor.record_success(now);
        assert_eq!(status.monitor.consecutive_errors, 0);
        assert_eq!(status.health_label(now), "healthy");
    }

    #[test]
    fn test_stale_scan_is_critical() {
        let mut status = BotStatus::new(true);
        let t0 = status.started_at;
        assert!(!status.is_critical_at(t0 + Duration::minutes(5)));
        assert!(status.is_critical_at(t0 + Duration::minutes(11)));

        status.scan.record_success(t0 + Duration::minutes(9));
        assert!(!status.is_critical_at(t0 + Duration::minutes(15)));
    }
}

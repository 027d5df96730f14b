//! SQLite-backed store.
//!
//! Decimals are stored as TEXT so quantities and prices round-trip exactly.
//! Timestamps are RFC 3339 UTC with microseconds, which keeps lexical order
//! equal to time order.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::debug;

use super::{signal_cutoff, PositionStore, SignalRecord};
use crate::error::{TradeError, TradeResult};
use crate::models::{BotStatus, ExitReason, Position, PositionStatus, Trade};

pub struct SqliteStore {
    pool: SqlitePool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct PositionRow {
    id: i64,
    asset_id: String,
    contract_ref: String,
    source: String,
    quantity: String,
    buy_price: String,
    open_time: String,
    status: String,
    peak_pnl_percent: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct TradeRow {
    asset_id: String,
    source: String,
    quantity: String,
    buy_price: String,
    sell_price: String,
    pnl_usd: String,
    pnl_percent: String,
    hold_secs: i64,
    buy_time: String,
    sell_time: String,
    exit_reason: String,
    exit_detail: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct SignalRow {
    asset_id: String,
    contract_ref: String,
    source: String,
    total_score: f64,
    confidence: String,
    recommendation: String,
    summary: String,
    recorded_at: String,
}

fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> TradeResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| TradeError::Storage(format!("bad timestamp {:?}: {}", s, e)))
}

fn parse_dec(s: &str) -> TradeResult<Decimal> {
    Decimal::from_str(s).map_err(|e| TradeError::Storage(format!("bad decimal {:?}: {}", s, e)))
}

impl TryFrom<PositionRow> for Position {
    type Error = TradeError;

    fn try_from(row: PositionRow) -> TradeResult<Self> {
        Ok(Position {
            quantity: parse_dec(&row.quantity)?,
            buy_price: parse_dec(&row.buy_price)?,
            open_time: parse_ts(&row.open_time)?,
            status: PositionStatus::parse(&row.status),
            peak_pnl_percent: parse_dec(&row.peak_pnl_percent)?,
            asset_id: row.asset_id,
            contract_ref: row.contract_ref,
            source: row.source,
        })
    }
}

impl TryFrom<TradeRow> for Trade {
    type Error = TradeError;

    fn try_from(row: TradeRow) -> TradeResult<Self> {
        Ok(Trade {
            quantity: parse_dec(&row.quantity)?,
            buy_price: parse_dec(&row.buy_price)?,
            sell_price: parse_dec(&row.sell_price)?,
            pnl_usd: parse_dec(&row.pnl_usd)?,
            pnl_percent: parse_dec(&row.pnl_percent)?,
            hold_secs: row.hold_secs,
            buy_time: parse_ts(&row.buy_time)?,
            sell_time: parse_ts(&row.sell_time)?,
            exit_reason: ExitReason::parse(&row.exit_reason),
            asset_id: row.asset_id,
            source: row.source,
            exit_detail: row.exit_detail,
        })
    }
}

impl TryFrom<SignalRow> for SignalRecord {
    type Error = TradeError;

    fn try_from(row: SignalRow) -> TradeResult<Self> {
        Ok(SignalRecord {
            recorded_at: parse_ts(&row.recorded_at)?,
            asset_id: row.asset_id,
            contract_ref: row.contract_ref,
            source: row.source,
            total_score: row.total_score,
            confidence: row.confidence,
            recommendation: row.recommendation,
            summary: row.summary,
        })
    }
}

const POSITION_COLUMNS: &str =
    "id, asset_id, contract_ref, source, quantity, buy_price, open_time, status, peak_pnl_percent";

const TRADE_COLUMNS: &str = "asset_id, source, quantity, buy_price, sell_price, pnl_usd, pnl_percent, \
     hold_secs, buy_time, sell_time, exit_reason, exit_detail";

impl SqliteStore {
    /// Connect and run migrations. `sqlite::memory:` gets a single
    /// long-lived connection so every query sees the same database.
    pub async fn new(database_url: &str) -> TradeResult<Self> {
        let in_memory = database_url.contains(":memory:");
        let mut options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 5 });
        if in_memory {
            options = options.idle_timeout(None).max_lifetime(None);
        }

        let pool = options
            .connect(database_url)
            .await
            .map_err(|e| TradeError::Storage(format!("failed to connect to {}: {}", database_url, e)))?;

        let store = Self { pool };
        store.run_migrations().await?;
        debug!(url = %database_url, "Position store ready");

        Ok(store)
    }

    async fn run_migrations(&self) -> TradeResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                asset_id TEXT NOT NULL,
                contract_ref TEXT NOT NULL DEFAULT '',
                source TEXT NOT NULL DEFAULT '',
                quantity TEXT NOT NULL,
                buy_price TEXT NOT NULL,
                open_time TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'OPEN',
                peak_pnl_percent TEXT NOT NULL DEFAULT '0',
                closed_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // At most one OPEN position per asset
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_positions_one_open
            ON positions(asset_id) WHERE status = 'OPEN'
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                position_id INTEGER NOT NULL UNIQUE,
                asset_id TEXT NOT NULL,
                source TEXT NOT NULL DEFAULT '',
                quantity TEXT NOT NULL,
                buy_price TEXT NOT NULL,
                sell_price TEXT NOT NULL,
                pnl_usd TEXT NOT NULL,
                pnl_percent TEXT NOT NULL,
                hold_secs INTEGER NOT NULL,
                buy_time TEXT NOT NULL,
                sell_time TEXT NOT NULL,
                exit_reason TEXT NOT NULL,
                exit_detail TEXT NOT NULL DEFAULT '',
                FOREIGN KEY (position_id) REFERENCES positions(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                asset_id TEXT NOT NULL,
                contract_ref TEXT NOT NULL DEFAULT '',
                source TEXT NOT NULL,
                total_score REAL NOT NULL,
                confidence TEXT NOT NULL,
                recommendation TEXT NOT NULL,
                summary TEXT NOT NULL DEFAULT '',
                recorded_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bot_status (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                body TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_sell_time ON trades(sell_time)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_signals_recorded_at ON signals(recorded_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl PositionStore for SqliteStore {
    async fn open(&self, position: Position) -> TradeResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO positions
                (asset_id, contract_ref, source, quantity, buy_price, open_time, status, peak_pnl_percent)
            VALUES (?, ?, ?, ?, ?, ?, 'OPEN', ?)
            "#,
        )
        .bind(&position.asset_id)
        .bind(&position.contract_ref)
        .bind(&position.source)
        .bind(position.quantity.to_string())
        .bind(position.buy_price.to_string())
        .bind(ts(position.open_time))
        .bind(position.peak_pnl_percent.to_string())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(TradeError::DuplicatePosition(position.asset_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn close(
        &self,
        asset_id: &str,
        sell_price: Decimal,
        reason: ExitReason,
        detail: &str,
    ) -> TradeResult<Option<Trade>> {
        let mut tx = self.pool.begin().await?;

        let row: Option<PositionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM positions WHERE asset_id = ? AND status = 'OPEN'",
            POSITION_COLUMNS
        ))
        .bind(asset_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let position_id = row.id;
        let position = Position::try_from(row)?;

        let sell_time = Utc::now();
        let updated = sqlx::query("UPDATE positions SET status = 'CLOSED', closed_at = ? WHERE id = ? AND status = 'OPEN'")
            .bind(ts(sell_time))
            .bind(position_id)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() != 1 {
            return Ok(None);
        }

        let trade = Trade::from_close(&position, sell_price, sell_time, reason, detail);
        sqlx::query(&format!(
            "INSERT INTO trades (position_id, {}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            TRADE_COLUMNS
        ))
        .bind(position_id)
        .bind(&trade.asset_id)
        .bind(&trade.source)
        .bind(trade.quantity.to_string())
        .bind(trade.buy_price.to_string())
        .bind(trade.sell_price.to_string())
        .bind(trade.pnl_usd.to_string())
        .bind(trade.pnl_percent.to_string())
        .bind(trade.hold_secs)
        .bind(ts(trade.buy_time))
        .bind(ts(trade.sell_time))
        .bind(trade.exit_reason.as_str())
        .bind(&trade.exit_detail)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(trade))
    }

    async fn list_open(&self) -> TradeResult<Vec<Position>> {
        let rows: Vec<PositionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM positions WHERE status = 'OPEN' ORDER BY open_time ASC",
            POSITION_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Position::try_from).collect()
    }

    async fn get_open(&self, asset_id: &str) -> TradeResult<Option<Position>> {
        let row: Option<PositionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM positions WHERE asset_id = ? AND status = 'OPEN'",
            POSITION_COLUMNS
        ))
        .bind(asset_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Position::try_from).transpose()
    }

    async fn update_peak(&self, asset_id: &str, peak_pnl_percent: Decimal) -> TradeResult<()> {
        // TEXT decimals do not compare numerically in SQL, so read-compare-write
        // inside one transaction.
        let mut tx = self.pool.begin().await?;
        let current: Option<(i64, String)> =
            sqlx::query_as("SELECT id, peak_pnl_percent FROM positions WHERE asset_id = ? AND status = 'OPEN'")
                .bind(asset_id)
                .fetch_optional(&mut *tx)
                .await?;

        if let Some((id, peak)) = current {
            if peak_pnl_percent > parse_dec(&peak)? {
                sqlx::query("UPDATE positions SET peak_pnl_percent = ? WHERE id = ?")
                    .bind(peak_pnl_percent.to_string())
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn trade_history(&self, limit: i64) -> TradeResult<Vec<Trade>> {
        let rows: Vec<TradeRow> = sqlx::query_as(&format!(
            "SELECT {} FROM trades ORDER BY sell_time DESC, id DESC LIMIT ?",
            TRADE_COLUMNS
        ))
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Trade::try_from).collect()
    }

    async fn trades_since(&self, since: DateTime<Utc>) -> TradeResult<Vec<Trade>> {
        let rows: Vec<TradeRow> = sqlx::query_as(&format!(
            "SELECT {} FROM trades WHERE sell_time >= ? ORDER BY sell_time ASC",
            TRADE_COLUMNS
        ))
        .bind(ts(since))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Trade::try_from).collect()
    }

    async fn save_signal(&self, record: &SignalRecord) -> TradeResult<()> {
        sqlx::query(
            r#"
            INSERT INTO signals
                (asset_id, contract_ref, source, total_score, confidence, recommendation, summary, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.asset_id)
        .bind(&record.contract_ref)
        .bind(&record.source)
        .bind(record.total_score)
        .bind(&record.confidence)
        .bind(&record.recommendation)
        .bind(&record.summary)
        .bind(ts(record.recorded_at))
        .execute(&self.pool)
        .await?;

        sqlx::query("DELETE FROM signals WHERE recorded_at < ?")
            .bind(ts(signal_cutoff(Utc::now())))
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn recent_signals(&self, limit: i64) -> TradeResult<Vec<SignalRecord>> {
        let rows: Vec<SignalRow> = sqlx::query_as(
            r#"
            SELECT asset_id, contract_ref, source, total_score, confidence, recommendation, summary, recorded_at
            FROM signals
            ORDER BY recorded_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SignalRecord::try_from).collect()
    }

    async fn save_status(&self, status: &BotStatus) -> TradeResult<()> {
        let body = serde_json::to_string(status).map_err(|e| TradeError::Storage(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO bot_status (id, body, updated_at) VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at
            "#,
        )
        .bind(body)
        .bind(ts(Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_status(&self) -> TradeResult<Option<BotStatus>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT body FROM bot_status WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;

        row.map(|(body,)| serde_json::from_str(&body).map_err(|e| TradeError::Storage(e.to_string())))
            .transpose()
    }
}

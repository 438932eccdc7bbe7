//! SQLite trade ledger adapter.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};

use crate::domain::config_validation::{parse_ledger_target, LedgerTarget};
use crate::domain::error::TradeloopError;
use crate::domain::ledger::{
    LedgerAggregate, NewTradeRecord, PnlHorizon, RealizedPnl, RunStatus, RunSummary, TradeReceipt,
    TradeRecord,
};
use crate::domain::market::Side;
use crate::ports::config_port::ConfigPort;
use crate::ports::ledger_port::LedgerPort;

const TRADE_COLUMNS: &str = "id, run_id, ticker, side, quantity, price, executed_at, \
                             justification, order_ref, market_context, portfolio_before, \
                             receipt, pnl_short, pnl_long";

const RUN_COLUMNS: &str = "run_id, started_at, finished_at, status, planned, valid, adjusted, \
                           executed, failed, rule_version, fault, report";

pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
}

fn pool_err(e: r2d2::Error) -> TradeloopError {
    TradeloopError::Database {
        reason: e.to_string(),
    }
}

fn query_err(e: rusqlite::Error) -> TradeloopError {
    TradeloopError::DatabaseQuery {
        reason: e.to_string(),
    }
}

/// Fixed-width UTC timestamps so text comparison matches time order.
fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_err<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn parse_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn parse_json(row: &Row<'_>, idx: usize) -> rusqlite::Result<serde_json::Value> {
    let s: String = row.get(idx)?;
    serde_json::from_str(&s).map_err(|e| conversion_err(idx, e))
}

fn invalid_text(idx: usize, what: &str, value: &str) -> rusqlite::Error {
    conversion_err(
        idx,
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("invalid {}: {}", what, value),
        ),
    )
}

fn parse_receipt(row: &Row<'_>, idx: usize) -> rusqlite::Result<TradeReceipt> {
    let s: String = row.get(idx)?;
    serde_json::from_str(&s).map_err(|e| conversion_err(idx, e))
}

fn trade_from_row(row: &Row<'_>) -> rusqlite::Result<TradeRecord> {
    let side: String = row.get(3)?;
    let side = Side::parse(&side).ok_or_else(|| invalid_text(3, "side", &side))?;
    Ok(TradeRecord {
        id: row.get(0)?,
        core: NewTradeRecord {
            run_id: row.get(1)?,
            ticker: row.get(2)?,
            side,
            quantity: row.get(4)?,
            price: row.get(5)?,
            executed_at: parse_ts(row, 6)?,
            justification: row.get(7)?,
            order_ref: row.get(8)?,
            market_context: parse_json(row, 9)?,
            receipt: parse_receipt(row, 11)?,
            portfolio_before: parse_json(row, 10)?,
        },
        pnl_short: row.get(12)?,
        pnl_long: row.get(13)?,
    })
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunSummary> {
    let status: String = row.get(3)?;
    let status = RunStatus::parse(&status).ok_or_else(|| invalid_text(3, "status", &status))?;
    let rule_version: Option<i64> = row.get(9)?;
    Ok(RunSummary {
        run_id: row.get(0)?,
        started_at: parse_ts(row, 1)?,
        finished_at: parse_ts(row, 2)?,
        status,
        planned: row.get::<_, i64>(4)? as usize,
        valid: row.get::<_, i64>(5)? as usize,
        adjusted: row.get::<_, i64>(6)? as usize,
        executed: row.get::<_, i64>(7)? as usize,
        failed: row.get::<_, i64>(8)? as usize,
        rule_version: rule_version.map(|v| v as u64),
        fault: row.get(10)?,
        report: row.get(11)?,
    })
}

impl SqliteAdapter {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, TradeloopError> {
        let target =
            config
                .get_string("storage", "ledger")
                .ok_or_else(|| TradeloopError::ConfigMissing {
                    section: "storage".into(),
                    key: "ledger".into(),
                })?;
        let pool_size = config.get_int("storage", "pool_size", 4).max(1) as u32;

        match parse_ledger_target(&target)? {
            LedgerTarget::Sqlite(path) => Self::open(&path, pool_size),
            LedgerTarget::Postgres(_) => Err(TradeloopError::ConfigInvalid {
                section: "storage".into(),
                key: "ledger".into(),
                reason: "configured ledger is not sqlite".into(),
            }),
        }
    }

    pub fn open(path: &Path, pool_size: u32) -> Result<Self, TradeloopError> {
        let manager = SqliteConnectionManager::file(path)
            .with_init(|c| c.busy_timeout(Duration::from_secs(5)));
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(pool_err)?;

        let adapter = Self { pool };
        adapter.initialize_schema()?;
        Ok(adapter)
    }

    pub fn in_memory() -> Result<Self, TradeloopError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(pool_err)?;

        let adapter = Self { pool };
        adapter.initialize_schema()?;
        Ok(adapter)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, TradeloopError> {
        self.pool.get().map_err(pool_err)
    }

    pub fn initialize_schema(&self) -> Result<(), TradeloopError> {
        let conn = self.conn()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                ticker TEXT NOT NULL,
                side TEXT NOT NULL CHECK (side IN ('buy', 'sell')),
                quantity INTEGER NOT NULL,
                price REAL NOT NULL,
                executed_at TEXT NOT NULL,
                justification TEXT NOT NULL,
                order_ref TEXT,
                market_context TEXT NOT NULL,
                portfolio_before TEXT NOT NULL,
                receipt TEXT NOT NULL,
                pnl_short REAL,
                pnl_long REAL
            );
            CREATE INDEX IF NOT EXISTS idx_trades_executed_at ON trades(executed_at);
            CREATE INDEX IF NOT EXISTS idx_trades_ticker ON trades(ticker);
            CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                status TEXT NOT NULL,
                planned INTEGER NOT NULL,
                valid INTEGER NOT NULL,
                adjusted INTEGER NOT NULL,
                executed INTEGER NOT NULL,
                failed INTEGER NOT NULL,
                rule_version INTEGER,
                fault TEXT,
                report TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs(started_at);",
        )
        .map_err(query_err)?;

        Ok(())
    }

    fn select_trades(
        &self,
        filter: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<TradeRecord>, TradeloopError> {
        let conn = self.conn()?;
        let query = format!(
            "SELECT {} FROM trades WHERE {} ORDER BY executed_at ASC, id ASC",
            TRADE_COLUMNS, filter
        );
        let mut stmt = conn.prepare(&query).map_err(query_err)?;
        let rows = stmt.query_map(args, trade_from_row).map_err(query_err)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(query_err)?);
        }
        Ok(records)
    }
}

impl LedgerPort for SqliteAdapter {
    fn append_trade(&self, record: &NewTradeRecord) -> Result<i64, TradeloopError> {
        let receipt = serde_json::to_string(&record.receipt)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO trades (run_id, ticker, side, quantity, price, executed_at,
                                 justification, order_ref, market_context, portfolio_before,
                                 receipt)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.run_id,
                record.ticker,
                record.side.as_str(),
                record.quantity,
                record.price,
                ts(record.executed_at),
                record.justification,
                record.order_ref,
                record.market_context.to_string(),
                record.portfolio_before.to_string(),
                receipt,
            ],
        )
        .map_err(query_err)?;
        Ok(conn.last_insert_rowid())
    }

    fn record_realized_pnl(&self, id: i64, pnl: RealizedPnl) -> Result<(), TradeloopError> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE trades
                 SET pnl_short = COALESCE(?1, pnl_short),
                     pnl_long = COALESCE(?2, pnl_long)
                 WHERE id = ?3",
                params![pnl.short, pnl.long, id],
            )
            .map_err(query_err)?;
        if changed == 0 {
            return Err(TradeloopError::RecordNotFound { id });
        }
        Ok(())
    }

    fn get_trade(&self, id: i64) -> Result<Option<TradeRecord>, TradeloopError> {
        let conn = self.conn()?;
        let query = format!("SELECT {} FROM trades WHERE id = ?1", TRADE_COLUMNS);
        conn.query_row(&query, params![id], trade_from_row)
            .optional()
            .map_err(query_err)
    }

    fn trades_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TradeRecord>, TradeloopError> {
        self.select_trades(
            "executed_at >= ?1 AND executed_at < ?2",
            &[&ts(start), &ts(end)],
        )
    }

    fn aggregate(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        horizon: PnlHorizon,
    ) -> Result<LedgerAggregate, TradeloopError> {
        let conn = self.conn()?;
        let col = horizon.column();
        let query = format!(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN {col} IS NULL THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN {col} > 0 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN {col} < 0 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM({col}), 0.0)
             FROM trades
             WHERE executed_at >= ?1 AND executed_at < ?2",
            col = col
        );
        conn.query_row(&query, params![ts(start), ts(end)], |row| {
            Ok(LedgerAggregate {
                count: row.get::<_, i64>(0)? as usize,
                pending: row.get::<_, i64>(1)? as usize,
                wins: row.get::<_, i64>(2)? as usize,
                losses: row.get::<_, i64>(3)? as usize,
                total_pnl: row.get(4)?,
            })
        })
        .map_err(query_err)
    }

    fn pending_pnl(&self, before: DateTime<Utc>) -> Result<Vec<TradeRecord>, TradeloopError> {
        self.select_trades(
            "executed_at < ?1 AND (pnl_short IS NULL OR pnl_long IS NULL)",
            &[&ts(before)],
        )
    }

    fn append_run(&self, summary: &RunSummary) -> Result<(), TradeloopError> {
        let conn = self.conn()?;
        let query = format!(
            "INSERT INTO runs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            RUN_COLUMNS
        );
        conn.execute(
            &query,
            params![
                summary.run_id,
                ts(summary.started_at),
                ts(summary.finished_at),
                summary.status.as_str(),
                summary.planned as i64,
                summary.valid as i64,
                summary.adjusted as i64,
                summary.executed as i64,
                summary.failed as i64,
                summary.rule_version.map(|v| v as i64),
                summary.fault,
                summary.report,
            ],
        )
        .map_err(query_err)?;
        Ok(())
    }

    fn recent_runs(&self, limit: usize) -> Result<Vec<RunSummary>, TradeloopError> {
        let conn = self.conn()?;
        let query = format!(
            "SELECT {} FROM runs ORDER BY started_at DESC, run_id DESC LIMIT ?1",
            RUN_COLUMNS
        );
        let mut stmt = conn.prepare(&query).map_err(query_err)?;
        let rows = stmt
            .query_map(params![limit as i64], run_from_row)
            .map_err(query_err)?;

        let mut runs = Vec::new();
        for row in rows {
            runs.push(row.map_err(query_err)?);
        }
        Ok(runs)
    }
}

//! PostgreSQL trade ledger adapter.

use chrono::{DateTime, Utc};
use postgres::types::ToSql;
use postgres::{NoTls, Row};
use r2d2::{Pool, PooledConnection};
use r2d2_postgres::PostgresConnectionManager;

use crate::domain::error::TradeloopError;
use crate::domain::ledger::{
    LedgerAggregate, NewTradeRecord, PnlHorizon, RealizedPnl, RunStatus, RunSummary, TradeRecord,
};
use crate::domain::market::Side;
use crate::ports::ledger_port::LedgerPort;

const TRADE_COLUMNS: &str = "id, run_id, ticker, side, quantity, price, executed_at, \
                             justification, order_ref, market_context, portfolio_before, \
                             receipt, pnl_short, pnl_long";

const RUN_COLUMNS: &str = "run_id, started_at, finished_at, status, planned, valid, adjusted, \
                           executed, failed, rule_version, fault, report";

type Manager = PostgresConnectionManager<NoTls>;

pub struct PostgresAdapter {
    pool: Pool<Manager>,
}

fn pool_err(e: r2d2::Error) -> TradeloopError {
    TradeloopError::Database {
        reason: e.to_string(),
    }
}

fn query_err(e: postgres::Error) -> TradeloopError {
    TradeloopError::DatabaseQuery {
        reason: e.to_string(),
    }
}

fn trade_from_row(row: &Row) -> Result<TradeRecord, TradeloopError> {
    let side: String = row.get(3);
    let side = Side::parse(&side).ok_or_else(|| TradeloopError::DatabaseQuery {
        reason: format!("invalid side in trades row: {}", side),
    })?;
    let market_context: String = row.get(9);
    let portfolio_before: String = row.get(10);
    let receipt: String = row.get(11);
    Ok(TradeRecord {
        id: row.get(0),
        core: NewTradeRecord {
            run_id: row.get(1),
            ticker: row.get(2),
            side,
            quantity: row.get(4),
            price: row.get(5),
            executed_at: row.get(6),
            justification: row.get(7),
            order_ref: row.get(8),
            market_context: serde_json::from_str(&market_context)?,
            receipt: serde_json::from_str(&receipt)?,
            portfolio_before: serde_json::from_str(&portfolio_before)?,
        },
        pnl_short: row.get(12),
        pnl_long: row.get(13),
    })
}

fn run_from_row(row: &Row) -> Result<RunSummary, TradeloopError> {
    let status: String = row.get(3);
    let status = RunStatus::parse(&status).ok_or_else(|| TradeloopError::DatabaseQuery {
        reason: format!("invalid status in runs row: {}", status),
    })?;
    let rule_version: Option<i64> = row.get(9);
    Ok(RunSummary {
        run_id: row.get(0),
        started_at: row.get(1),
        finished_at: row.get(2),
        status,
        planned: row.get::<_, i64>(4) as usize,
        valid: row.get::<_, i64>(5) as usize,
        adjusted: row.get::<_, i64>(6) as usize,
        executed: row.get::<_, i64>(7) as usize,
        failed: row.get::<_, i64>(8) as usize,
        rule_version: rule_version.map(|v| v as u64),
        fault: row.get(10),
        report: row.get(11),
    })
}

impl PostgresAdapter {
    pub fn connect(conninfo: &str, pool_size: u32) -> Result<Self, TradeloopError> {
        let config: postgres::Config = conninfo.parse().map_err(query_err)?;
        let manager = PostgresConnectionManager::new(config, NoTls);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(pool_err)?;

        let adapter = Self { pool };
        adapter.initialize_schema()?;
        Ok(adapter)
    }

    fn conn(&self) -> Result<PooledConnection<Manager>, TradeloopError> {
        self.pool.get().map_err(pool_err)
    }

    pub fn initialize_schema(&self) -> Result<(), TradeloopError> {
        let mut conn = self.conn()?;
        conn.batch_execute(
            "CREATE TABLE IF NOT EXISTS trades (
                id BIGSERIAL PRIMARY KEY,
                run_id TEXT NOT NULL,
                ticker TEXT NOT NULL,
                side TEXT NOT NULL CHECK (side IN ('buy', 'sell')),
                quantity BIGINT NOT NULL,
                price DOUBLE PRECISION NOT NULL,
                executed_at TIMESTAMPTZ NOT NULL,
                justification TEXT NOT NULL,
                order_ref TEXT,
                market_context TEXT NOT NULL,
                portfolio_before TEXT NOT NULL,
                receipt TEXT NOT NULL,
                pnl_short DOUBLE PRECISION,
                pnl_long DOUBLE PRECISION
            );
            CREATE INDEX IF NOT EXISTS idx_trades_executed_at ON trades(executed_at);
            CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                started_at TIMESTAMPTZ NOT NULL,
                finished_at TIMESTAMPTZ NOT NULL,
                status TEXT NOT NULL,
                planned BIGINT NOT NULL,
                valid BIGINT NOT NULL,
                adjusted BIGINT NOT NULL,
                executed BIGINT NOT NULL,
                failed BIGINT NOT NULL,
                rule_version BIGINT,
                fault TEXT,
                report TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs(started_at);",
        )
        .map_err(query_err)
    }

    fn select_trades(
        &self,
        filter: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<TradeRecord>, TradeloopError> {
        let query = format!(
            "SELECT {} FROM trades WHERE {} ORDER BY executed_at ASC, id ASC",
            TRADE_COLUMNS, filter
        );
        let rows = self.conn()?.query(query.as_str(), params).map_err(query_err)?;
        rows.iter().map(trade_from_row).collect()
    }
}

impl LedgerPort for PostgresAdapter {
    fn append_trade(&self, record: &NewTradeRecord) -> Result<i64, TradeloopError> {
        let market_context = record.market_context.to_string();
        let portfolio_before = record.portfolio_before.to_string();
        let receipt = serde_json::to_string(&record.receipt)?;
        let params: &[&(dyn ToSql + Sync)] = &[
            &record.run_id,
            &record.ticker,
            &record.side.as_str(),
            &record.quantity,
            &record.price,
            &record.executed_at,
            &record.justification,
            &record.order_ref,
            &market_context,
            &portfolio_before,
            &receipt,
        ];
        let row = self
            .conn()?
            .query_one(
                "INSERT INTO trades (run_id, ticker, side, quantity, price, executed_at,
                                     justification, order_ref, market_context, portfolio_before,
                                     receipt)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                 RETURNING id",
                params,
            )
            .map_err(query_err)?;
        Ok(row.get(0))
    }

    fn record_realized_pnl(&self, id: i64, pnl: RealizedPnl) -> Result<(), TradeloopError> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE trades
                 SET pnl_short = COALESCE($1, pnl_short),
                     pnl_long = COALESCE($2, pnl_long)
                 WHERE id = $3",
                &[&pnl.short, &pnl.long, &id],
            )
            .map_err(query_err)?;
        if changed == 0 {
            return Err(TradeloopError::RecordNotFound { id });
        }
        Ok(())
    }

    fn get_trade(&self, id: i64) -> Result<Option<TradeRecord>, TradeloopError> {
        let query = format!("SELECT {} FROM trades WHERE id = $1", TRADE_COLUMNS);
        let row = self
            .conn()?
            .query_opt(query.as_str(), &[&id])
            .map_err(query_err)?;
        row.as_ref().map(trade_from_row).transpose()
    }

    fn trades_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TradeRecord>, TradeloopError> {
        self.select_trades("executed_at >= $1 AND executed_at < $2", &[&start, &end])
    }

    fn aggregate(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        horizon: PnlHorizon,
    ) -> Result<LedgerAggregate, TradeloopError> {
        let col = horizon.column();
        let query = format!(
            "SELECT COUNT(*)::bigint,
                    COUNT(*) FILTER (WHERE {col} IS NULL)::bigint,
                    COUNT(*) FILTER (WHERE {col} > 0)::bigint,
                    COUNT(*) FILTER (WHERE {col} < 0)::bigint,
                    COALESCE(SUM({col}), 0)::double precision
             FROM trades
             WHERE executed_at >= $1 AND executed_at < $2",
            col = col
        );
        let row = self
            .conn()?
            .query_one(query.as_str(), &[&start, &end])
            .map_err(query_err)?;
        Ok(LedgerAggregate {
            count: row.get::<_, i64>(0) as usize,
            pending: row.get::<_, i64>(1) as usize,
            wins: row.get::<_, i64>(2) as usize,
            losses: row.get::<_, i64>(3) as usize,
            total_pnl: row.get(4),
        })
    }

    fn pending_pnl(&self, before: DateTime<Utc>) -> Result<Vec<TradeRecord>, TradeloopError> {
        self.select_trades(
            "executed_at < $1 AND (pnl_short IS NULL OR pnl_long IS NULL)",
            &[&before],
        )
    }

    fn append_run(&self, summary: &RunSummary) -> Result<(), TradeloopError> {
        let query = format!(
            "INSERT INTO runs ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            RUN_COLUMNS
        );
        let counts = [
            summary.planned as i64,
            summary.valid as i64,
            summary.adjusted as i64,
            summary.executed as i64,
            summary.failed as i64,
        ];
        let rule_version = summary.rule_version.map(|v| v as i64);
        let params: &[&(dyn ToSql + Sync)] = &[
            &summary.run_id,
            &summary.started_at,
            &summary.finished_at,
            &summary.status.as_str(),
            &counts[0],
            &counts[1],
            &counts[2],
            &counts[3],
            &counts[4],
            &rule_version,
            &summary.fault,
            &summary.report,
        ];
        self.conn()?
            .execute(query.as_str(), params)
            .map_err(query_err)?;
        Ok(())
    }

    fn recent_runs(&self, limit: usize) -> Result<Vec<RunSummary>, TradeloopError> {
        let query = format!(
            "SELECT {} FROM runs ORDER BY started_at DESC, run_id DESC LIMIT $1",
            RUN_COLUMNS
        );
        let rows = self
            .conn()?
            .query(query.as_str(), &[&(limit as i64)])
            .map_err(query_err)?;
        rows.iter().map(run_from_row).collect()
    }
}

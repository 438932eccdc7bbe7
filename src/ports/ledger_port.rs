//! Trade ledger storage port.

use chrono::{DateTime, Utc};

use crate::domain::error::TradeloopError;
use crate::domain::ledger::{
    LedgerAggregate, NewTradeRecord, PnlHorizon, RealizedPnl, RunSummary, TradeRecord,
};

/// Append-mostly trade store. Core fields are immutable after `append_trade`;
/// the deferred P&L fields are the only thing `record_realized_pnl` touches.
pub trait LedgerPort: Send + Sync {
    fn append_trade(&self, record: &NewTradeRecord) -> Result<i64, TradeloopError>;

    fn record_realized_pnl(&self, id: i64, pnl: RealizedPnl) -> Result<(), TradeloopError>;

    fn get_trade(&self, id: i64) -> Result<Option<TradeRecord>, TradeloopError>;

    /// Trades with `start <= executed_at < end`, oldest first.
    fn trades_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TradeRecord>, TradeloopError>;

    fn aggregate(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        horizon: PnlHorizon,
    ) -> Result<LedgerAggregate, TradeloopError>;

    /// Trades executed before `before` with at least one deferred field empty.
    fn pending_pnl(&self, before: DateTime<Utc>) -> Result<Vec<TradeRecord>, TradeloopError>;

    fn append_run(&self, summary: &RunSummary) -> Result<(), TradeloopError>;

    fn recent_runs(&self, limit: usize) -> Result<Vec<RunSummary>, TradeloopError>;
}

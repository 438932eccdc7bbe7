//! Performance window over a range of ledger records.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::error::TradeloopError;
use super::ledger::{LedgerAggregate, PnlHorizon, TradeRecord};

/// Longest lookback a performance window may cover.
pub const MAX_WINDOW_DAYS: i64 = 3650;

/// Start of a `days`-long window ending at `end`.
pub fn window_start(end: DateTime<Utc>, days: i64) -> Result<DateTime<Utc>, TradeloopError> {
    if !(1..=MAX_WINDOW_DAYS).contains(&days) {
        return Err(TradeloopError::Validation {
            reason: format!("window of {} days is outside 1..={}", days, MAX_WINDOW_DAYS),
        });
    }
    TimeDelta::try_days(days)
        .and_then(|span| end.checked_sub_signed(span))
        .ok_or_else(|| TradeloopError::Validation {
            reason: format!("window of {} days starts before the representable range", days),
        })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedTrade {
    pub id: i64,
    pub ticker: String,
    pub side: String,
    pub quantity: i64,
    pub price: f64,
    pub pnl: f64,
    pub executed_at: DateTime<Utc>,
    pub justification: String,
}

impl RankedTrade {
    fn from_record(record: &TradeRecord, pnl: f64) -> Self {
        RankedTrade {
            id: record.id,
            ticker: record.core.ticker.clone(),
            side: record.core.side.to_string(),
            quantity: record.core.quantity,
            price: record.core.price,
            pnl,
            executed_at: record.core.executed_at,
            justification: record.core.justification.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub horizon: PnlHorizon,
    pub trade_count: usize,
    pub pending: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub best: Vec<RankedTrade>,
    pub worst: Vec<RankedTrade>,
}

impl PerformanceWindow {
    /// Combine ledger totals with a K-best/K-worst ranking of the records.
    /// Records without a realized value for `horizon` are not ranked.
    pub fn assemble(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        horizon: PnlHorizon,
        aggregate: LedgerAggregate,
        records: &[TradeRecord],
        top_k: usize,
    ) -> Self {
        let mut ranked: Vec<RankedTrade> = records
            .iter()
            .filter_map(|r| r.realized(horizon).map(|pnl| RankedTrade::from_record(r, pnl)))
            .collect();
        ranked.sort_by(|a, b| a.pnl.total_cmp(&b.pnl).then(a.id.cmp(&b.id)));

        let worst: Vec<RankedTrade> = ranked.iter().take(top_k).cloned().collect();
        let best: Vec<RankedTrade> = ranked.iter().rev().take(top_k).cloned().collect();

        PerformanceWindow {
            start,
            end,
            horizon,
            trade_count: aggregate.count,
            pending: aggregate.pending,
            wins: aggregate.wins,
            losses: aggregate.losses,
            win_rate: aggregate.win_rate(),
            total_pnl: aggregate.total_pnl,
            best,
            worst,
        }
    }

    pub fn realized(&self) -> usize {
        self.trade_count - self.pending
    }

    /// Stats forwarded to the oracle alongside the worst trades.
    pub fn stats(&self) -> serde_json::Value {
        serde_json::json!({
            "start": self.start,
            "end": self.end,
            "horizon": self.horizon,
            "trade_count": self.trade_count,
            "pending": self.pending,
            "wins": self.wins,
            "losses": self.losses,
            "win_rate": self.win_rate,
            "total_pnl": self.total_pnl,
        })
    }
}

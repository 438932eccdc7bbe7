//! Trade ledger records and aggregates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::market::Side;

/// Which deferred P&L field an aggregate or ranking reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PnlHorizon {
    Short,
    Long,
}

impl PnlHorizon {
    pub fn parse(s: &str) -> Option<PnlHorizon> {
        match s {
            "short" => Some(PnlHorizon::Short),
            "long" => Some(PnlHorizon::Long),
            _ => None,
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            PnlHorizon::Short => "pnl_short",
            PnlHorizon::Long => "pnl_long",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillKind {
    Full,
    Partial,
}

/// Execution receipt embedded in a trade row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeReceipt {
    pub fill: FillKind,
    /// Quantity the plan asked for.
    pub planned_quantity: i64,
    /// Quantity sent to the broker after validation.
    pub submitted_quantity: i64,
    /// Validation note, e.g. the clamp that reduced the order.
    #[serde(default)]
    pub note: Option<String>,
}

/// Core trade fields, fixed at insert time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTradeRecord {
    pub run_id: String,
    pub ticker: String,
    pub side: Side,
    pub quantity: i64,
    pub price: f64,
    pub executed_at: DateTime<Utc>,
    pub justification: String,
    pub order_ref: Option<String>,
    pub receipt: TradeReceipt,
    pub market_context: serde_json::Value,
    pub portfolio_before: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: i64,
    #[serde(flatten)]
    pub core: NewTradeRecord,
    pub pnl_short: Option<f64>,
    pub pnl_long: Option<f64>,
}

impl TradeRecord {
    pub fn realized(&self, horizon: PnlHorizon) -> Option<f64> {
        match horizon {
            PnlHorizon::Short => self.pnl_short,
            PnlHorizon::Long => self.pnl_long,
        }
    }
}

/// Point update of the deferred fields. `None` leaves a field untouched.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RealizedPnl {
    pub short: Option<f64>,
    pub long: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LedgerAggregate {
    pub count: usize,
    pub pending: usize,
    pub wins: usize,
    pub losses: usize,
    pub total_pnl: f64,
}

impl LedgerAggregate {
    pub fn realized(&self) -> usize {
        self.count - self.pending
    }

    /// Wins over realized trades; pending trades do not count.
    pub fn win_rate(&self) -> f64 {
        let realized = self.realized();
        if realized > 0 {
            self.wins as f64 / realized as f64
        } else {
            0.0
        }
    }

    /// Fold records into an aggregate; used by adapters without SQL.
    pub fn from_records<'a>(
        records: impl IntoIterator<Item = &'a TradeRecord>,
        horizon: PnlHorizon,
    ) -> Self {
        let mut agg = LedgerAggregate::default();
        for record in records {
            agg.count += 1;
            match record.realized(horizon) {
                None => agg.pending += 1,
                Some(pnl) => {
                    agg.total_pnl += pnl;
                    if pnl > 0.0 {
                        agg.wins += 1;
                    } else if pnl < 0.0 {
                        agg.losses += 1;
                    }
                }
            }
        }
        agg
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Partial,
    Rejected,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Rejected => "rejected",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<RunStatus> {
        match s {
            "success" => Some(RunStatus::Success),
            "partial" => Some(RunStatus::Partial),
            "rejected" => Some(RunStatus::Rejected),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row per operational run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub planned: usize,
    pub valid: usize,
    pub adjusted: usize,
    pub executed: usize,
    pub failed: usize,
    pub rule_version: Option<u64>,
    pub fault: Option<String>,
    pub report: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn record(id: i64, pnl_short: Option<f64>) -> TradeRecord {
        TradeRecord {
            id,
            core: NewTradeRecord {
                run_id: "run-1".into(),
                ticker: format!("T{id}"),
                side: Side::Buy,
                quantity: 1,
                price: 100.0,
                executed_at: Utc::now(),
                justification: String::new(),
                order_ref: None,
                receipt: TradeReceipt {
                    fill: FillKind::Full,
                    planned_quantity: 1,
                    submitted_quantity: 1,
                    note: None,
                },
                market_context: serde_json::Value::Null,
                portfolio_before: serde_json::Value::Null,
            },
            pnl_short,
            pnl_long: None,
        }
    }

    #[test]
    fn aggregate_counts_pending_separately() {
        let records = vec![
            record(1, Some(50.0)),
            record(2, Some(30.0)),
            record(3, Some(-20.0)),
            record(4, Some(-10.0)),
            record(5, Some(-40.0)),
            record(6, None),
        ];
        let agg = LedgerAggregate::from_records(&records, PnlHorizon::Short);
        assert_eq!(agg.count, 6);
        assert_eq!(agg.pending, 1);
        assert_eq!(agg.wins, 2);
        assert_eq!(agg.losses, 3);
        assert_relative_eq!(agg.total_pnl, 10.0);
        assert_relative_eq!(agg.win_rate(), 0.4);
    }

    #[test]
    fn win_rate_without_realized_trades_is_zero() {
        let agg = LedgerAggregate::from_records(&[record(1, None)], PnlHorizon::Short);
        assert_eq!(agg.win_rate(), 0.0);
    }

    #[test]
    fn long_horizon_reads_long_field() {
        let mut r = record(1, Some(5.0));
        r.pnl_long = Some(-3.0);
        let agg = LedgerAggregate::from_records(&[r], PnlHorizon::Long);
        assert_eq!(agg.losses, 1);
        assert_relative_eq!(agg.total_pnl, -3.0);
    }

    #[test]
    fn run_status_round_trips() {
        for status in [
            RunStatus::Success,
            RunStatus::Partial,
            RunStatus::Rejected,
            RunStatus::Failed,
        ] {
            assert_eq!(RunStatus::parse(status.as_str()), Some(status));
        }
    }
}

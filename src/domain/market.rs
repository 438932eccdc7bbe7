//! Portfolio, market, and plan types exchanged with collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    pub fn parse(s: &str) -> Option<Side> {
        match s {
            "buy" => Some(Side::Buy),
            "sell" => Some(Side::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub ticker: String,
    pub quantity: i64,
    pub avg_price: f64,
    pub current_price: f64,
}

impl Holding {
    pub fn market_value(&self) -> f64 {
        self.quantity as f64 * self.current_price
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.quantity as f64 * (self.current_price - self.avg_price)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub cash: f64,
    pub holdings: Vec<Holding>,
    pub taken_at: DateTime<Utc>,
}

impl PortfolioSnapshot {
    pub fn total_value(&self) -> f64 {
        self.cash + self.holdings.iter().map(Holding::market_value).sum::<f64>()
    }

    pub fn cash_ratio(&self) -> f64 {
        let total = self.total_value();
        if total > 0.0 { self.cash / total } else { 0.0 }
    }

    /// Sum of losses on holdings trading below cost, as a positive number.
    pub fn unrealized_loss(&self) -> f64 {
        self.holdings
            .iter()
            .map(Holding::unrealized_pnl)
            .filter(|pnl| *pnl < 0.0)
            .map(f64::abs)
            .sum()
    }

    pub fn holding(&self, ticker: &str) -> Option<&Holding> {
        self.holdings.iter().find(|h| h.ticker == ticker)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub ticker: String,
    pub price: f64,
    pub change_pct: f64,
    pub volume: i64,
    pub quoted_at: DateTime<Utc>,
}

/// Collected market facts handed to the oracle. No scoring happens here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketAnalysis {
    pub quotes: BTreeMap<String, Quote>,
    pub ranked: Vec<String>,
    pub cash_ratio: f64,
    pub analyzed_at: DateTime<Utc>,
}

impl MarketAnalysis {
    /// Market context attached to a trade record for one ticker.
    pub fn context_for(&self, ticker: &str) -> serde_json::Value {
        serde_json::json!({
            "quote": self.quotes.get(ticker),
            "ranked": self.ranked.iter().any(|t| t == ticker),
            "cash_ratio": self.cash_ratio,
            "analyzed_at": self.analyzed_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedAction {
    pub ticker: String,
    pub side: Side,
    pub quantity: i64,
    pub price: f64,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradePlan {
    pub actions: Vec<ProposedAction>,
    pub justification: String,
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Valid,
    Adjusted,
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedAction {
    pub action: ProposedAction,
    pub verdict: Verdict,
    pub requested_quantity: i64,
    pub quantity: i64,
    pub capacity: Option<i64>,
    pub note: Option<String>,
}

impl ValidatedAction {
    pub fn is_executable(&self) -> bool {
        self.verdict != Verdict::Invalid && self.quantity > 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanValidation {
    pub actions: Vec<ValidatedAction>,
}

impl PlanValidation {
    pub fn executable(&self) -> impl Iterator<Item = &ValidatedAction> {
        self.actions.iter().filter(|a| a.is_executable())
    }

    pub fn valid_count(&self) -> usize {
        self.executable().count()
    }

    pub fn adjusted_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| a.verdict == Verdict::Adjusted)
            .count()
    }

    pub fn is_executable(&self) -> bool {
        self.valid_count() > 0
    }
}

/// Provider response to a single order submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub filled_quantity: i64,
    pub fill_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReceiptOutcome {
    Accepted { order_id: String },
    Partial { order_id: String },
    Rejected { error: String },
    Unknown { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReceipt {
    pub ticker: String,
    pub side: Side,
    pub requested_quantity: i64,
    pub filled_quantity: i64,
    pub price: f64,
    pub outcome: ReceiptOutcome,
    pub submitted_at: DateTime<Utc>,
}

impl ExecutionReceipt {
    pub fn filled(&self) -> bool {
        matches!(
            self.outcome,
            ReceiptOutcome::Accepted { .. } | ReceiptOutcome::Partial { .. }
        ) && self.filled_quantity > 0
    }

    pub fn fully_filled(&self) -> bool {
        matches!(self.outcome, ReceiptOutcome::Accepted { .. })
    }

    pub fn order_id(&self) -> Option<&str> {
        match &self.outcome {
            ReceiptOutcome::Accepted { order_id } | ReceiptOutcome::Partial { order_id } => {
                Some(order_id)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub receipts: Vec<ExecutionReceipt>,
}

impl ExecutionResult {
    pub fn filled_count(&self) -> usize {
        self.receipts.iter().filter(|r| r.filled()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.receipts.iter().filter(|r| !r.filled()).count()
    }
}

//! Decision oracle port.
//!
//! The oracle is an opaque decision maker: plans, failure diagnoses, and rule
//! proposals come out of it, and the core only validates what it returns.

use async_trait::async_trait;

use crate::domain::error::TradeloopError;
use crate::domain::market::{MarketAnalysis, PortfolioSnapshot, TradePlan};
use crate::domain::performance::RankedTrade;
use crate::domain::rules::{PatternSet, RuleCandidate, RuleSetVersion};

#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn generate_plan(
        &self,
        portfolio: &PortfolioSnapshot,
        analysis: &MarketAnalysis,
        ruleset: &RuleSetVersion,
    ) -> Result<TradePlan, TradeloopError>;

    async fn diagnose_failures(
        &self,
        worst_trades: &[RankedTrade],
        stats: &serde_json::Value,
    ) -> Result<PatternSet, TradeloopError>;

    async fn propose_rules(
        &self,
        patterns: &PatternSet,
    ) -> Result<Vec<RuleCandidate>, TradeloopError>;
}

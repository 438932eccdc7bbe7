//! Per-run state threaded through the operational pipeline.
//!
//! Each stage owns one write-once slot. Writing a slot twice is an internal
//! error, so no stage can overwrite what an earlier stage produced.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error::TradeloopError;
use super::ledger::RunSummary;
use super::market::{ExecutionResult, MarketAnalysis, PlanValidation, PortfolioSnapshot, TradePlan};
use super::rules::RuleSetVersion;
use super::workflow::{Journal, Journaled};

pub(crate) fn fill<T>(
    slot: &mut Option<T>,
    name: &'static str,
    value: T,
) -> Result<(), TradeloopError> {
    if slot.is_some() {
        return Err(TradeloopError::SlotOccupied { slot: name });
    }
    *slot = Some(value);
    Ok(())
}

pub(crate) fn require<'a, T>(slot: &'a Option<T>, name: &str) -> Result<&'a T, TradeloopError> {
    slot.as_ref().ok_or_else(|| TradeloopError::Internal {
        reason: format!("required state slot '{}' is empty", name),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationalState {
    pub journal: Journal,
    pub started_at: DateTime<Utc>,
    portfolio: Option<PortfolioSnapshot>,
    analysis: Option<MarketAnalysis>,
    #[serde(skip)]
    ruleset: Option<Arc<RuleSetVersion>>,
    rule_version: Option<u64>,
    plan: Option<TradePlan>,
    validation: Option<PlanValidation>,
    execution: Option<ExecutionResult>,
    summary: Option<RunSummary>,
}

impl OperationalState {
    pub fn new(run_id: impl Into<String>) -> Self {
        OperationalState {
            journal: Journal::new(run_id),
            started_at: Utc::now(),
            portfolio: None,
            analysis: None,
            ruleset: None,
            rule_version: None,
            plan: None,
            validation: None,
            execution: None,
            summary: None,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.journal.run_id
    }

    pub fn portfolio(&self) -> Option<&PortfolioSnapshot> {
        self.portfolio.as_ref()
    }

    pub fn analysis(&self) -> Option<&MarketAnalysis> {
        self.analysis.as_ref()
    }

    pub fn ruleset(&self) -> Option<&Arc<RuleSetVersion>> {
        self.ruleset.as_ref()
    }

    pub fn rule_version(&self) -> Option<u64> {
        self.rule_version
    }

    pub fn plan(&self) -> Option<&TradePlan> {
        self.plan.as_ref()
    }

    pub fn validation(&self) -> Option<&PlanValidation> {
        self.validation.as_ref()
    }

    pub fn execution(&self) -> Option<&ExecutionResult> {
        self.execution.as_ref()
    }

    pub fn summary(&self) -> Option<&RunSummary> {
        self.summary.as_ref()
    }

    pub fn require_portfolio(&self) -> Result<&PortfolioSnapshot, TradeloopError> {
        require(&self.portfolio, "portfolio")
    }

    pub fn require_analysis(&self) -> Result<&MarketAnalysis, TradeloopError> {
        require(&self.analysis, "analysis")
    }

    pub fn require_plan(&self) -> Result<&TradePlan, TradeloopError> {
        require(&self.plan, "plan")
    }

    pub fn require_validation(&self) -> Result<&PlanValidation, TradeloopError> {
        require(&self.validation, "validation")
    }

    pub fn set_portfolio(&mut self, value: PortfolioSnapshot) -> Result<(), TradeloopError> {
        fill(&mut self.portfolio, "portfolio", value)
    }

    pub fn set_analysis(&mut self, value: MarketAnalysis) -> Result<(), TradeloopError> {
        fill(&mut self.analysis, "analysis", value)
    }

    pub fn set_ruleset(&mut self, value: Arc<RuleSetVersion>) -> Result<(), TradeloopError> {
        let id = value.id;
        fill(&mut self.ruleset, "ruleset", value)?;
        self.rule_version = Some(id);
        Ok(())
    }

    pub fn set_plan(&mut self, value: TradePlan) -> Result<(), TradeloopError> {
        fill(&mut self.plan, "plan", value)
    }

    pub fn set_validation(&mut self, value: PlanValidation) -> Result<(), TradeloopError> {
        fill(&mut self.validation, "validation", value)
    }

    pub fn set_execution(&mut self, value: ExecutionResult) -> Result<(), TradeloopError> {
        fill(&mut self.execution, "execution", value)
    }

    pub fn set_summary(&mut self, value: RunSummary) -> Result<(), TradeloopError> {
        fill(&mut self.summary, "summary", value)
    }
}

impl Journaled for OperationalState {
    fn journal(&self) -> &Journal {
        &self.journal
    }

    fn journal_mut(&mut self) -> &mut Journal {
        &mut self.journal
    }
}

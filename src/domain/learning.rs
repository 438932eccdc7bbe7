//! Slow-cadence pipeline: aggregate recorded outcomes, diagnose failures,
//! propose rules, and publish a new rule version.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::call::{blocking, bounded, CallPolicy};
use super::error::{FaultKind, TradeloopError};
use super::ledger::PnlHorizon;
use super::performance::{window_start, PerformanceWindow};
use super::rule_store::RuleStore;
use super::rules::{
    merge_rules, validate_candidate, AcceptedCandidate, PatternSet, RuleCandidate, VersionOrigin,
};
use super::state::{fill, require};
use super::workflow::{new_run_id, Flow, Journal, Journaled, Node, Workflow};
use crate::ports::ledger_port::LedgerPort;
use crate::ports::oracle_port::DecisionOracle;
use crate::ports::report_port::ReportPort;

pub const AGGREGATE_PERFORMANCE: &str = "aggregate_performance";
pub const DIAGNOSE_PATTERNS: &str = "diagnose_patterns";
pub const PROPOSE_RULES: &str = "propose_rules";
pub const UPDATE_RULE_STORE: &str = "update_rule_store";
pub const WRITE_REPORT: &str = "write_report";

#[derive(Clone)]
pub struct LearningPorts {
    pub oracle: Arc<dyn DecisionOracle>,
    pub ledger: Arc<dyn LedgerPort>,
    pub reports: Arc<dyn ReportPort>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LearningSettings {
    pub calls: CallPolicy,
    pub window_days: i64,
    pub top_k: usize,
    pub horizon: PnlHorizon,
}

impl Default for LearningSettings {
    fn default() -> Self {
        LearningSettings {
            calls: CallPolicy::default(),
            window_days: 30,
            top_k: 5,
            horizon: PnlHorizon::Short,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroppedCandidate {
    pub candidate: RuleCandidate,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LearningOutcome {
    Updated { version: u64 },
    NoChange,
    Skipped { reason: String },
    Failed { reason: String },
}

impl std::fmt::Display for LearningOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LearningOutcome::Updated { version } => write!(f, "updated to version {}", version),
            LearningOutcome::NoChange => write!(f, "no change"),
            LearningOutcome::Skipped { reason } => write!(f, "skipped: {}", reason),
            LearningOutcome::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

/// Artifact written at the end of every learning cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningReport {
    pub cycle_id: String,
    pub generated_at: DateTime<Utc>,
    pub outcome: LearningOutcome,
    pub window: Option<PerformanceWindow>,
    pub patterns: Option<PatternSet>,
    pub accepted: Vec<AcceptedCandidate>,
    pub dropped: Vec<DroppedCandidate>,
    pub previous_version: Option<u64>,
    pub new_version: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LearningState {
    pub journal: Journal,
    pub started_at: DateTime<Utc>,
    window: Option<PerformanceWindow>,
    patterns: Option<PatternSet>,
    accepted: Option<Vec<AcceptedCandidate>>,
    dropped: Vec<DroppedCandidate>,
    previous_version: Option<u64>,
    new_version: Option<u64>,
    report: Option<LearningReport>,
}

impl LearningState {
    pub fn new(cycle_id: impl Into<String>) -> Self {
        LearningState {
            journal: Journal::new(cycle_id),
            started_at: Utc::now(),
            window: None,
            patterns: None,
            accepted: None,
            dropped: Vec::new(),
            previous_version: None,
            new_version: None,
            report: None,
        }
    }

    pub fn cycle_id(&self) -> &str {
        &self.journal.run_id
    }

    pub fn window(&self) -> Option<&PerformanceWindow> {
        self.window.as_ref()
    }

    pub fn patterns(&self) -> Option<&PatternSet> {
        self.patterns.as_ref()
    }

    pub fn accepted(&self) -> &[AcceptedCandidate] {
        self.accepted.as_deref().unwrap_or(&[])
    }

    pub fn dropped(&self) -> &[DroppedCandidate] {
        &self.dropped
    }

    pub fn new_version(&self) -> Option<u64> {
        self.new_version
    }

    pub fn report(&self) -> Option<&LearningReport> {
        self.report.as_ref()
    }

    pub fn outcome(&self) -> LearningOutcome {
        if let Some(version) = self.new_version {
            return LearningOutcome::Updated { version };
        }
        match &self.journal.abort {
            Some(abort) if abort.kind == FaultKind::Validation => LearningOutcome::Skipped {
                reason: abort.reason.clone(),
            },
            Some(abort) => LearningOutcome::Failed {
                reason: format!("{} ({}): {}", abort.node, abort.kind, abort.reason),
            },
            None => LearningOutcome::NoChange,
        }
    }

    fn build_report(&self) -> LearningReport {
        LearningReport {
            cycle_id: self.cycle_id().to_string(),
            generated_at: Utc::now(),
            outcome: self.outcome(),
            window: self.window.clone(),
            patterns: self.patterns.clone(),
            accepted: self.accepted().to_vec(),
            dropped: self.dropped.clone(),
            previous_version: self.previous_version,
            new_version: self.new_version,
        }
    }
}

impl Journaled for LearningState {
    fn journal(&self) -> &Journal {
        &self.journal
    }

    fn journal_mut(&mut self) -> &mut Journal {
        &mut self.journal
    }
}

struct AggregatePerformance {
    ledger: Arc<dyn LedgerPort>,
    window_days: i64,
    top_k: usize,
    horizon: PnlHorizon,
}

#[async_trait]
impl Node<LearningState> for AggregatePerformance {
    fn name(&self) -> &'static str {
        AGGREGATE_PERFORMANCE
    }

    async fn run(&self, state: &mut LearningState) -> Result<Flow, TradeloopError> {
        let end = Utc::now();
        let start = window_start(end, self.window_days)?;
        let ledger = Arc::clone(&self.ledger);
        let horizon = self.horizon;
        let (aggregate, records) = blocking(move || {
            let aggregate = ledger.aggregate(start, end, horizon)?;
            let records = ledger.trades_between(start, end)?;
            Ok((aggregate, records))
        })
        .await?;
        let window =
            PerformanceWindow::assemble(start, end, self.horizon, aggregate, &records, self.top_k);

        info!(
            cycle_id = %state.cycle_id(),
            trades = window.trade_count,
            pending = window.pending,
            win_rate = window.win_rate,
            total_pnl = window.total_pnl,
            "aggregated performance"
        );
        let realized = window.realized();
        let count = window.trade_count;
        fill(&mut state.window, "window", window)?;

        if realized == 0 {
            return Ok(Flow::abort(
                FaultKind::Validation,
                format!("insufficient history: {} trades, none realized", count),
            ));
        }
        Ok(Flow::Continue)
    }
}

struct DiagnosePatterns {
    oracle: Arc<dyn DecisionOracle>,
    timeout: Duration,
}

#[async_trait]
impl Node<LearningState> for DiagnosePatterns {
    fn name(&self) -> &'static str {
        DIAGNOSE_PATTERNS
    }

    async fn run(&self, state: &mut LearningState) -> Result<Flow, TradeloopError> {
        let window = require(&state.window, "window")?;
        let stats = window.stats();
        let patterns = bounded(
            "diagnose_failures",
            self.timeout,
            self.oracle.diagnose_failures(&window.worst, &stats),
        )
        .await?;
        info!(cycle_id = %state.cycle_id(), patterns = patterns.patterns.len(), "diagnosed failures");
        fill(&mut state.patterns, "patterns", patterns)?;
        Ok(Flow::Continue)
    }
}

struct ProposeRules {
    oracle: Arc<dyn DecisionOracle>,
    timeout: Duration,
}

#[async_trait]
impl Node<LearningState> for ProposeRules {
    fn name(&self) -> &'static str {
        PROPOSE_RULES
    }

    async fn run(&self, state: &mut LearningState) -> Result<Flow, TradeloopError> {
        let patterns = require(&state.patterns, "patterns")?;
        if patterns.is_empty() {
            info!(cycle_id = %state.cycle_id(), "no failure patterns, nothing to propose");
            fill(&mut state.accepted, "accepted", Vec::new())?;
            return Ok(Flow::Continue);
        }

        let candidates = bounded(
            "propose_rules",
            self.timeout,
            self.oracle.propose_rules(patterns),
        )
        .await?;

        let mut accepted = Vec::new();
        for candidate in candidates {
            match validate_candidate(&candidate) {
                Ok(ok) => {
                    debug!(
                        cycle_id = %state.cycle_id(),
                        text = %ok.rule.text,
                        metrics = ?ok.metrics,
                        "rule candidate accepted"
                    );
                    accepted.push(ok);
                }
                Err(e) => {
                    warn!(
                        cycle_id = %state.cycle_id(),
                        text = %candidate.text,
                        error = %e,
                        "dropping invalid rule candidate"
                    );
                    state.dropped.push(DroppedCandidate {
                        candidate,
                        reason: e.to_string(),
                    });
                }
            }
        }
        info!(
            cycle_id = %state.cycle_id(),
            accepted = accepted.len(),
            dropped = state.dropped.len(),
            "rule candidates checked"
        );
        fill(&mut state.accepted, "accepted", accepted)?;
        Ok(Flow::Continue)
    }
}

struct UpdateRuleStore {
    rules: Arc<RuleStore>,
    reports: Arc<dyn ReportPort>,
}

#[async_trait]
impl Node<LearningState> for UpdateRuleStore {
    fn name(&self) -> &'static str {
        UPDATE_RULE_STORE
    }

    async fn run(&self, state: &mut LearningState) -> Result<Flow, TradeloopError> {
        let accepted = require(&state.accepted, "accepted")?.clone();
        if accepted.is_empty() {
            info!(cycle_id = %state.cycle_id(), "no valid candidates, rule set unchanged");
            return Ok(Flow::Continue);
        }

        let merging = accepted.clone();
        let result = self
            .rules
            .update(VersionOrigin::Learning, move |current| {
                merge_rules(&current.rules, &merging)
            })
            .await;
        let previous = match &result {
            Ok(version) => version.previous,
            Err(_) => Some(self.rules.active().id),
        };
        state.previous_version = previous;

        match result {
            Ok(version) => {
                info!(
                    cycle_id = %state.cycle_id(),
                    version = version.id,
                    rules = version.rules.len(),
                    "published rule version"
                );
                state.new_version = Some(version.id);
                Ok(Flow::Continue)
            }
            Err(e) => {
                let payload = serde_json::json!({
                    "cycle_id": state.cycle_id(),
                    "previous_version": previous,
                    "accepted": accepted,
                    "error": e.to_string(),
                });
                if let Err(dump) = self.reports.write_fallback(state.cycle_id(), &payload) {
                    error!(
                        cycle_id = %state.cycle_id(),
                        error = %dump,
                        payload = %payload,
                        "fallback dump failed, merge payload follows"
                    );
                }
                Err(e)
            }
        }
    }
}

struct WriteReport {
    reports: Arc<dyn ReportPort>,
}

#[async_trait]
impl Node<LearningState> for WriteReport {
    fn name(&self) -> &'static str {
        WRITE_REPORT
    }

    fn always_run(&self) -> bool {
        true
    }

    async fn run(&self, state: &mut LearningState) -> Result<Flow, TradeloopError> {
        let report = state.build_report();
        info!(cycle_id = %state.cycle_id(), outcome = %report.outcome, "learning cycle finished");
        let written = self.reports.write_learning_report(&report);
        fill(&mut state.report, "report", report)?;
        written?;
        Ok(Flow::Continue)
    }
}

pub struct LearningPipeline {
    workflow: Workflow<LearningState>,
}

impl LearningPipeline {
    pub fn new(ports: LearningPorts, rules: Arc<RuleStore>, settings: LearningSettings) -> Self {
        let workflow = Workflow::new("learning")
            .node(AggregatePerformance {
                ledger: ports.ledger,
                window_days: settings.window_days,
                top_k: settings.top_k,
                horizon: settings.horizon,
            })
            .node(DiagnosePatterns {
                oracle: Arc::clone(&ports.oracle),
                timeout: settings.calls.oracle_timeout,
            })
            .node(ProposeRules {
                oracle: ports.oracle,
                timeout: settings.calls.oracle_timeout,
            })
            .node(UpdateRuleStore {
                rules,
                reports: Arc::clone(&ports.reports),
            })
            .node(WriteReport {
                reports: ports.reports,
            });
        LearningPipeline { workflow }
    }

    pub fn node_names(&self) -> Vec<&'static str> {
        self.workflow.node_names()
    }

    pub async fn run_cycle(&self, cancel: &CancellationToken) -> LearningState {
        let mut state = LearningState::new(new_run_id("learn"));
        info!(cycle_id = %state.cycle_id(), "learning cycle started");
        self.workflow.execute(&mut state, cancel).await;
        state
    }
}

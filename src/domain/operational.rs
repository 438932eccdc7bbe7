//! Fast-cadence pipeline: fetch, analyze, plan, validate, execute, record.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::call::{blocking, bounded, retry_read, CallPolicy};
use super::error::{FaultKind, TradeloopError};
use super::ledger::{FillKind, NewTradeRecord, RunStatus, RunSummary, TradeReceipt};
use super::market::{
    ExecutionReceipt, ExecutionResult, Holding, MarketAnalysis, PlanValidation,
    PortfolioSnapshot, ProposedAction, ReceiptOutcome, Side, ValidatedAction, Verdict,
};
use super::rule_store::RuleStore;
use super::state::OperationalState;
use super::workflow::{new_run_id, Flow, Node, Workflow};
use crate::ports::execution_port::OrderExecutionProvider;
use crate::ports::ledger_port::LedgerPort;
use crate::ports::market_data_port::MarketDataProvider;
use crate::ports::notification_port::NotificationSink;
use crate::ports::oracle_port::DecisionOracle;
use crate::ports::report_port::ReportPort;

pub const FETCH_PORTFOLIO: &str = "fetch_portfolio";
pub const ANALYZE_MARKET: &str = "analyze_market";
pub const GENERATE_PLAN: &str = "generate_plan";
pub const VALIDATE_PLAN: &str = "validate_plan";
pub const EXECUTE_PLAN: &str = "execute_plan";
pub const RECORD_AND_REPORT: &str = "record_and_report";

/// Collaborators the operational pipeline talks to.
#[derive(Clone)]
pub struct OperationalPorts {
    pub market: Arc<dyn MarketDataProvider>,
    pub broker: Arc<dyn OrderExecutionProvider>,
    pub oracle: Arc<dyn DecisionOracle>,
    pub notifier: Arc<dyn NotificationSink>,
    pub ledger: Arc<dyn LedgerPort>,
    pub reports: Arc<dyn ReportPort>,
}

/// Portfolio-level limits checked after capacity. `None` disables a limit.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RiskLimits {
    /// Largest share of total value a single ticker may reach through buys, in percent.
    pub max_position_pct: Option<f64>,
    /// Unrealized loss, in percent of total value, above which buys are refused.
    pub max_daily_loss_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct OperationalSettings {
    pub calls: CallPolicy,
    /// Ranking criteria queried during analysis, e.g. `volume`.
    pub rankings: Vec<String>,
    /// Tickers kept per ranking criterion.
    pub max_ranked: usize,
    pub risk: RiskLimits,
}

// ---------------------------------------------------------------------------
// Validation rules
// ---------------------------------------------------------------------------

/// Reason an action is malformed before any capacity query, if it is.
pub fn precheck(action: &ProposedAction) -> Option<String> {
    if action.ticker.trim().is_empty() {
        return Some("ticker is empty".to_string());
    }
    if !action.price.is_finite() || action.price <= 0.0 {
        return Some(format!("price must be positive, got {}", action.price));
    }
    if action.quantity <= 0 {
        return Some(format!("quantity must be positive, got {}", action.quantity));
    }
    None
}

pub fn reject(action: &ProposedAction, capacity: Option<i64>, note: String) -> ValidatedAction {
    ValidatedAction {
        action: action.clone(),
        verdict: Verdict::Invalid,
        requested_quantity: action.quantity,
        quantity: 0,
        capacity,
        note: Some(note),
    }
}

/// Clamp a well-formed action against the provider's capacity.
pub fn clamp_to_capacity(action: &ProposedAction, capacity: i64) -> ValidatedAction {
    let requested = action.quantity;
    if capacity <= 0 {
        return reject(action, Some(capacity), "no capacity".to_string());
    }
    if requested > capacity {
        return ValidatedAction {
            action: action.clone(),
            verdict: Verdict::Adjusted,
            requested_quantity: requested,
            quantity: capacity,
            capacity: Some(capacity),
            note: Some(format!("clamped from {} to {}", requested, capacity)),
        };
    }
    ValidatedAction {
        action: action.clone(),
        verdict: Verdict::Valid,
        requested_quantity: requested,
        quantity: requested,
        capacity: Some(capacity),
        note: None,
    }
}

/// Why buys are refused under the loss limit, if they are.
pub fn loss_limit_breach(portfolio: &PortfolioSnapshot, limits: &RiskLimits) -> Option<String> {
    let pct = limits.max_daily_loss_pct?;
    let limit = portfolio.total_value() * pct / 100.0;
    let loss = portfolio.unrealized_loss();
    (loss > limit).then(|| {
        format!(
            "daily loss limit: unrealized loss {:.0} exceeds {}% of assets ({:.0})",
            loss, pct, limit
        )
    })
}

/// Shares of `ticker` still buyable at `price` before the position, plus
/// `committed` value already accepted in this plan, reaches `max_pct` of the
/// portfolio.
pub fn position_headroom(
    portfolio: &PortfolioSnapshot,
    ticker: &str,
    price: f64,
    committed: f64,
    max_pct: f64,
) -> i64 {
    let held = portfolio
        .holding(ticker)
        .map(Holding::market_value)
        .unwrap_or(0.0);
    let room = portfolio.total_value() * max_pct / 100.0 - held - committed;
    if room <= 0.0 || price <= 0.0 {
        0
    } else {
        (room / price).floor() as i64
    }
}

/// Clamp an executable buy to the concentration headroom.
pub fn limit_position(validated: ValidatedAction, headroom: i64, max_pct: f64) -> ValidatedAction {
    if !validated.is_executable() || validated.quantity <= headroom {
        return validated;
    }
    if headroom <= 0 {
        return reject(
            &validated.action,
            validated.capacity,
            format!("position limit {}% reached", max_pct),
        );
    }
    ValidatedAction {
        verdict: Verdict::Adjusted,
        quantity: headroom,
        note: Some(format!(
            "clamped from {} to {} by position limit {}%",
            validated.requested_quantity, headroom, max_pct
        )),
        ..validated
    }
}

/// Terminal status of a run from its journal and stage outputs.
pub fn terminal_status(state: &OperationalState, persistence_failed: bool) -> RunStatus {
    if persistence_failed {
        return RunStatus::Failed;
    }
    if let Some(abort) = &state.journal.abort {
        return if abort.kind == FaultKind::Validation {
            RunStatus::Rejected
        } else {
            RunStatus::Failed
        };
    }
    let Some(execution) = state.execution() else {
        return RunStatus::Failed;
    };
    let filled = execution.filled_count();
    if filled == 0 {
        RunStatus::Failed
    } else if execution.receipts.iter().all(|r| r.fully_filled()) {
        RunStatus::Success
    } else {
        RunStatus::Partial
    }
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

struct FetchPortfolio {
    market: Arc<dyn MarketDataProvider>,
    calls: CallPolicy,
}

#[async_trait]
impl Node<OperationalState> for FetchPortfolio {
    fn name(&self) -> &'static str {
        FETCH_PORTFOLIO
    }

    async fn run(&self, state: &mut OperationalState) -> Result<Flow, TradeloopError> {
        let market = &self.market;
        let portfolio = retry_read(
            "portfolio",
            self.calls.read_timeout,
            &self.calls.retry,
            || market.portfolio(),
        )
        .await?;
        info!(
            run_id = %state.run_id(),
            cash = portfolio.cash,
            holdings = portfolio.holdings.len(),
            total = portfolio.total_value(),
            "fetched portfolio"
        );
        state.set_portfolio(portfolio)?;
        Ok(Flow::Continue)
    }
}

struct AnalyzeMarket {
    market: Arc<dyn MarketDataProvider>,
    calls: CallPolicy,
    rankings: Vec<String>,
    max_ranked: usize,
}

impl AnalyzeMarket {
    async fn ranked_tickers(&self, run_id: &str) -> Vec<String> {
        let market = &self.market;
        let mut ranked: Vec<String> = Vec::new();
        for criteria in &self.rankings {
            let result = retry_read(
                "rankings",
                self.calls.read_timeout,
                &self.calls.retry,
                || market.rankings(criteria),
            )
            .await;
            match result {
                Ok(tickers) => {
                    for ticker in tickers.into_iter().take(self.max_ranked) {
                        if !ranked.contains(&ticker) {
                            ranked.push(ticker);
                        }
                    }
                }
                Err(e) => {
                    warn!(run_id, criteria = %criteria, error = %e, "ranking unavailable, skipping");
                }
            }
        }
        ranked
    }
}

#[async_trait]
impl Node<OperationalState> for AnalyzeMarket {
    fn name(&self) -> &'static str {
        ANALYZE_MARKET
    }

    async fn run(&self, state: &mut OperationalState) -> Result<Flow, TradeloopError> {
        let run_id = state.run_id().to_string();
        let portfolio = state.require_portfolio()?.clone();
        let ranked = self.ranked_tickers(&run_id).await;
        let market = &self.market;

        let mut quotes = BTreeMap::new();
        for holding in &portfolio.holdings {
            let ticker = &holding.ticker;
            let quote = retry_read(
                "quote",
                self.calls.read_timeout,
                &self.calls.retry,
                || market.quote(ticker),
            )
            .await?;
            quotes.insert(ticker.clone(), quote);
        }
        for ticker in &ranked {
            if quotes.contains_key(ticker) {
                continue;
            }
            let result = retry_read(
                "quote",
                self.calls.read_timeout,
                &self.calls.retry,
                || market.quote(ticker),
            )
            .await;
            match result {
                Ok(quote) => {
                    quotes.insert(ticker.clone(), quote);
                }
                Err(e) => warn!(run_id = %run_id, ticker = %ticker, error = %e, "quote unavailable for ranked ticker"),
            }
        }

        info!(run_id = %run_id, quotes = quotes.len(), ranked = ranked.len(), "analyzed market");
        state.set_analysis(MarketAnalysis {
            quotes,
            ranked,
            cash_ratio: portfolio.cash_ratio(),
            analyzed_at: Utc::now(),
        })?;
        Ok(Flow::Continue)
    }
}

struct GeneratePlan {
    oracle: Arc<dyn DecisionOracle>,
    rules: Arc<RuleStore>,
    timeout: Duration,
}

#[async_trait]
impl Node<OperationalState> for GeneratePlan {
    fn name(&self) -> &'static str {
        GENERATE_PLAN
    }

    async fn run(&self, state: &mut OperationalState) -> Result<Flow, TradeloopError> {
        let ruleset = self.rules.refresh().await?;
        state.set_ruleset(Arc::clone(&ruleset))?;

        let portfolio = state.require_portfolio()?;
        let analysis = state.require_analysis()?;
        let plan = bounded(
            "generate_plan",
            self.timeout,
            self.oracle.generate_plan(portfolio, analysis, &ruleset),
        )
        .await?;

        info!(
            run_id = %state.run_id(),
            version = ruleset.id,
            actions = plan.actions.len(),
            confidence = plan.confidence,
            "generated plan"
        );
        state.set_plan(plan)?;
        Ok(Flow::Continue)
    }
}

struct ValidatePlan {
    broker: Arc<dyn OrderExecutionProvider>,
    calls: CallPolicy,
    risk: RiskLimits,
}

impl ValidatePlan {
    async fn capacity(&self, action: &ProposedAction) -> Result<i64, TradeloopError> {
        let broker = &self.broker;
        let ticker = action.ticker.as_str();
        match action.side {
            Side::Buy => {
                retry_read(
                    "buy_capacity",
                    self.calls.read_timeout,
                    &self.calls.retry,
                    || broker.buy_capacity(ticker, action.price),
                )
                .await
            }
            Side::Sell => {
                retry_read(
                    "sell_capacity",
                    self.calls.read_timeout,
                    &self.calls.retry,
                    || broker.sell_capacity(ticker),
                )
                .await
            }
        }
    }

    fn apply_position_limit(
        &self,
        validated: ValidatedAction,
        portfolio: &PortfolioSnapshot,
        committed: &mut BTreeMap<String, f64>,
    ) -> ValidatedAction {
        let Some(max_pct) = self.risk.max_position_pct else {
            return validated;
        };
        let action = &validated.action;
        if action.side != Side::Buy {
            return validated;
        }
        let already = committed.get(&action.ticker).copied().unwrap_or(0.0);
        let headroom = position_headroom(portfolio, &action.ticker, action.price, already, max_pct);
        let limited = limit_position(validated, headroom, max_pct);
        if limited.is_executable() {
            *committed.entry(limited.action.ticker.clone()).or_insert(0.0) +=
                limited.quantity as f64 * limited.action.price;
        }
        limited
    }
}

#[async_trait]
impl Node<OperationalState> for ValidatePlan {
    fn name(&self) -> &'static str {
        VALIDATE_PLAN
    }

    async fn run(&self, state: &mut OperationalState) -> Result<Flow, TradeloopError> {
        let run_id = state.run_id().to_string();
        let plan = state.require_plan()?.clone();
        let portfolio = state.require_portfolio()?.clone();

        let blocked = loss_limit_breach(&portfolio, &self.risk);
        if let Some(reason) = &blocked {
            warn!(run_id = %run_id, reason = %reason, "buys refused");
        }

        let mut committed = BTreeMap::new();
        let mut actions = Vec::with_capacity(plan.actions.len());
        for action in &plan.actions {
            let validated = match (precheck(action), &blocked) {
                (Some(note), _) => reject(action, None, note),
                (None, Some(reason)) if action.side == Side::Buy => {
                    reject(action, None, reason.clone())
                }
                (None, _) => match self.capacity(action).await {
                    Ok(capacity) => self.apply_position_limit(
                        clamp_to_capacity(action, capacity),
                        &portfolio,
                        &mut committed,
                    ),
                    Err(e) => reject(action, None, format!("capacity check failed: {}", e)),
                },
            };
            match validated.verdict {
                Verdict::Invalid => warn!(
                    run_id = %run_id,
                    ticker = %action.ticker,
                    side = %action.side,
                    note = validated.note.as_deref().unwrap_or(""),
                    "action rejected"
                ),
                Verdict::Adjusted => info!(
                    run_id = %run_id,
                    ticker = %action.ticker,
                    requested = validated.requested_quantity,
                    quantity = validated.quantity,
                    note = validated.note.as_deref().unwrap_or(""),
                    "action clamped"
                ),
                Verdict::Valid => {}
            }
            actions.push(validated);
        }

        let validation = PlanValidation { actions };
        let valid = validation.valid_count();
        let total = validation.actions.len();
        state.set_validation(validation)?;

        if total == 0 {
            return Ok(Flow::abort(FaultKind::Validation, "plan contains no actions"));
        }
        if valid == 0 {
            return Ok(Flow::abort(
                FaultKind::Validation,
                format!("none of {} actions passed validation", total),
            ));
        }
        info!(run_id = %run_id, valid, total, "plan validated");
        Ok(Flow::Continue)
    }
}

struct ExecutePlan {
    broker: Arc<dyn OrderExecutionProvider>,
    timeout: Duration,
}

async fn submit(
    broker: &dyn OrderExecutionProvider,
    validated: &ValidatedAction,
    limit: Duration,
) -> ExecutionReceipt {
    let action = &validated.action;
    let submitted_at = Utc::now();
    let result = bounded(
        "submit_order",
        limit,
        broker.submit_order(&action.ticker, action.side, validated.quantity, action.price),
    )
    .await;

    let (filled_quantity, price, outcome) = match result {
        Ok(ack) => {
            let price = if ack.fill_price > 0.0 {
                ack.fill_price
            } else {
                action.price
            };
            let filled = ack.filled_quantity.clamp(0, validated.quantity);
            let outcome = if filled >= validated.quantity {
                ReceiptOutcome::Accepted {
                    order_id: ack.order_id,
                }
            } else if filled > 0 {
                ReceiptOutcome::Partial {
                    order_id: ack.order_id,
                }
            } else {
                ReceiptOutcome::Unknown {
                    error: format!("order {} acknowledged without a fill", ack.order_id),
                }
            };
            (filled, price, outcome)
        }
        Err(e @ TradeloopError::Timeout { .. }) => {
            (0, action.price, ReceiptOutcome::Unknown { error: e.to_string() })
        }
        Err(e) => (0, action.price, ReceiptOutcome::Rejected { error: e.to_string() }),
    };

    ExecutionReceipt {
        ticker: action.ticker.clone(),
        side: action.side,
        requested_quantity: validated.quantity,
        filled_quantity,
        price,
        outcome,
        submitted_at,
    }
}

#[async_trait]
impl Node<OperationalState> for ExecutePlan {
    fn name(&self) -> &'static str {
        EXECUTE_PLAN
    }

    async fn run(&self, state: &mut OperationalState) -> Result<Flow, TradeloopError> {
        let run_id = state.run_id().to_string();
        let executable: Vec<ValidatedAction> =
            state.require_validation()?.executable().cloned().collect();

        let broker = self.broker.as_ref();
        let receipts = join_all(
            executable
                .iter()
                .map(|validated| submit(broker, validated, self.timeout)),
        )
        .await;

        for receipt in &receipts {
            match &receipt.outcome {
                ReceiptOutcome::Accepted { order_id } | ReceiptOutcome::Partial { order_id } => {
                    info!(
                        run_id = %run_id,
                        ticker = %receipt.ticker,
                        side = %receipt.side,
                        filled = receipt.filled_quantity,
                        requested = receipt.requested_quantity,
                        order_id = %order_id,
                        "order filled"
                    )
                }
                ReceiptOutcome::Rejected { error } | ReceiptOutcome::Unknown { error } => warn!(
                    run_id = %run_id,
                    ticker = %receipt.ticker,
                    side = %receipt.side,
                    error = %error,
                    "order not filled"
                ),
            }
        }

        state.set_execution(ExecutionResult { receipts })?;
        Ok(Flow::Continue)
    }
}

struct RecordAndReport {
    ledger: Arc<dyn LedgerPort>,
    notifier: Arc<dyn NotificationSink>,
    reports: Arc<dyn ReportPort>,
    notify_timeout: Duration,
}

/// One ledger row per filled receipt, in submission order.
fn trade_records(state: &OperationalState) -> Result<Vec<NewTradeRecord>, TradeloopError> {
    let (Some(validation), Some(execution)) = (state.validation(), state.execution()) else {
        return Ok(Vec::new());
    };
    let justification = state
        .plan()
        .map(|p| p.justification.as_str())
        .unwrap_or("");
    let portfolio_before = serde_json::to_value(state.portfolio())?;

    let mut records = Vec::new();
    for (validated, receipt) in validation.executable().zip(&execution.receipts) {
        if !receipt.filled() {
            continue;
        }
        let market_context = state
            .analysis()
            .map(|a| a.context_for(&receipt.ticker))
            .unwrap_or(serde_json::Value::Null);
        records.push(NewTradeRecord {
            run_id: state.run_id().to_string(),
            ticker: receipt.ticker.clone(),
            side: receipt.side,
            quantity: receipt.filled_quantity,
            price: receipt.price,
            executed_at: receipt.submitted_at,
            justification: join_justification(justification, &validated.action.reason),
            order_ref: receipt.order_id().map(str::to_string),
            receipt: TradeReceipt {
                fill: if receipt.fully_filled() {
                    FillKind::Full
                } else {
                    FillKind::Partial
                },
                planned_quantity: validated.requested_quantity,
                submitted_quantity: validated.quantity,
                note: validated.note.clone(),
            },
            market_context,
            portfolio_before: portfolio_before.clone(),
        });
    }
    Ok(records)
}

/// Write the state of a run whose summary never reached the ledger.
fn dump_fallback(reports: &dyn ReportPort, state: &OperationalState) {
    let payload = match serde_json::to_value(state) {
        Ok(v) => v,
        Err(e) => {
            error!(run_id = %state.run_id(), error = %e, "could not serialize run state");
            return;
        }
    };
    if let Err(e) = reports.write_fallback(state.run_id(), &payload) {
        error!(
            run_id = %state.run_id(),
            error = %e,
            state = %payload,
            "fallback dump failed, run state follows"
        );
    } else {
        warn!(run_id = %state.run_id(), "run state written to fallback dump");
    }
}

impl RecordAndReport {
    async fn persist_trades(&self, state: &OperationalState) -> Result<usize, TradeloopError> {
        let records = trade_records(state)?;
        let ledger = Arc::clone(&self.ledger);
        let run_id = state.run_id().to_string();
        blocking(move || {
            for record in &records {
                let id = ledger.append_trade(record)?;
                info!(run_id = %run_id, ticker = %record.ticker, trade_id = id, "trade recorded");
            }
            Ok(records.len())
        })
        .await
    }

    async fn append_run(&self, summary: &RunSummary) -> Result<(), TradeloopError> {
        let ledger = Arc::clone(&self.ledger);
        let summary = summary.clone();
        blocking(move || ledger.append_run(&summary)).await
    }
}

#[async_trait]
impl Node<OperationalState> for RecordAndReport {
    fn name(&self) -> &'static str {
        RECORD_AND_REPORT
    }

    fn always_run(&self) -> bool {
        true
    }

    async fn run(&self, state: &mut OperationalState) -> Result<Flow, TradeloopError> {
        let trade_error = self.persist_trades(state).await.err();

        let mut summary = summarize(state, trade_error.as_ref());
        let summary_error = self.append_run(&summary).await.err();
        if let Some(e) = &summary_error {
            summary.status = RunStatus::Failed;
            summary.fault.get_or_insert_with(|| format!("{}: {}", RECORD_AND_REPORT, e));
        }

        let report = summary.report.clone();
        let status = summary.status;
        state.set_summary(summary)?;

        let failure = trade_error.or(summary_error);
        if failure.is_some() {
            dump_fallback(self.reports.as_ref(), state);
        }

        if let Err(e) = bounded("notify", self.notify_timeout, self.notifier.send(&report)).await {
            warn!(run_id = %state.run_id(), error = %e, "notification not delivered");
        }
        info!(run_id = %state.run_id(), %status, "run finished");

        match failure {
            Some(e) => Err(e),
            None => Ok(Flow::Continue),
        }
    }
}

fn join_justification(plan: &str, action: &str) -> String {
    match (plan.is_empty(), action.is_empty()) {
        (_, true) => plan.to_string(),
        (true, false) => action.to_string(),
        (false, false) => format!("{} | {}", plan, action),
    }
}

fn summarize(state: &OperationalState, persistence: Option<&TradeloopError>) -> RunSummary {
    let status = terminal_status(state, persistence.is_some());
    let fault = match (&state.journal.abort, persistence) {
        (Some(abort), _) => Some(format!("{} ({}): {}", abort.node, abort.kind, abort.reason)),
        (None, Some(e)) => Some(format!("{} ({}): {}", RECORD_AND_REPORT, e.kind(), e)),
        (None, None) => None,
    };
    let planned = state.plan().map(|p| p.actions.len()).unwrap_or(0);
    let (valid, adjusted) = state
        .validation()
        .map(|v| (v.valid_count(), v.adjusted_count()))
        .unwrap_or((0, 0));
    let (executed, failed) = state
        .execution()
        .map(|e| (e.filled_count(), e.failed_count()))
        .unwrap_or((0, 0));

    let mut summary = RunSummary {
        run_id: state.run_id().to_string(),
        started_at: state.started_at,
        finished_at: Utc::now(),
        status,
        planned,
        valid,
        adjusted,
        executed,
        failed,
        rule_version: state.rule_version(),
        fault,
        report: String::new(),
    };
    summary.report = render_report(state, &summary);
    summary
}

/// Plain-text report sent to the notification sink.
pub fn render_report(state: &OperationalState, summary: &RunSummary) -> String {
    let mut out = format!("Run {} finished: {}\n", summary.run_id, summary.status);
    if let Some(portfolio) = state.portfolio() {
        out.push_str(&format!(
            "Portfolio: {:.2} total, {:.2} cash, {} holdings\n",
            portfolio.total_value(),
            portfolio.cash,
            portfolio.holdings.len()
        ));
    }
    if let Some(version) = summary.rule_version {
        out.push_str(&format!("Rules: version {}\n", version));
    }
    if let Some(plan) = state.plan() {
        out.push_str(&format!(
            "Plan: {} actions (confidence {:.2}): {}\n",
            plan.actions.len(),
            plan.confidence,
            plan.justification
        ));
    }
    if let Some(validation) = state.validation() {
        for v in &validation.actions {
            let verdict = match v.verdict {
                Verdict::Valid => "valid",
                Verdict::Adjusted => "adjusted",
                Verdict::Invalid => "invalid",
            };
            out.push_str(&format!(
                "  {} {} {} @ {:.2}: {}",
                v.action.side, v.quantity, v.action.ticker, v.action.price, verdict
            ));
            if let Some(note) = &v.note {
                out.push_str(&format!(" ({})", note));
            }
            out.push('\n');
        }
    }
    if let Some(execution) = state.execution() {
        out.push_str(&format!(
            "Execution: {} filled, {} not filled\n",
            execution.filled_count(),
            execution.failed_count()
        ));
    }
    if let Some(fault) = &summary.fault {
        out.push_str(&format!("Fault: {}\n", fault));
    }
    out
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct OperationalPipeline {
    workflow: Workflow<OperationalState>,
    reports: Arc<dyn ReportPort>,
}

impl OperationalPipeline {
    pub fn new(ports: OperationalPorts, rules: Arc<RuleStore>, settings: OperationalSettings) -> Self {
        let calls = settings.calls;
        let workflow = Workflow::new("operational")
            .node(FetchPortfolio {
                market: Arc::clone(&ports.market),
                calls: calls.clone(),
            })
            .node(AnalyzeMarket {
                market: Arc::clone(&ports.market),
                calls: calls.clone(),
                rankings: settings.rankings,
                max_ranked: settings.max_ranked,
            })
            .node(GeneratePlan {
                oracle: ports.oracle,
                rules,
                timeout: calls.oracle_timeout,
            })
            .node(ValidatePlan {
                broker: Arc::clone(&ports.broker),
                calls: calls.clone(),
                risk: settings.risk,
            })
            .node(ExecutePlan {
                broker: ports.broker,
                timeout: calls.submit_timeout,
            })
            .node(RecordAndReport {
                ledger: ports.ledger,
                notifier: ports.notifier,
                reports: Arc::clone(&ports.reports),
                notify_timeout: calls.read_timeout,
            });
        OperationalPipeline {
            workflow,
            reports: ports.reports,
        }
    }

    pub fn node_names(&self) -> Vec<&'static str> {
        self.workflow.node_names()
    }

    /// Execute one run. Always returns a state carrying a summary.
    pub async fn run_once(&self, cancel: &CancellationToken) -> OperationalState {
        let mut state = OperationalState::new(new_run_id("run"));
        info!(run_id = %state.run_id(), "operational run started");
        self.workflow.execute(&mut state, cancel).await;

        if state.summary().is_none() {
            seal_unrecorded(&mut state, self.reports.as_ref());
        }
        state
    }
}

/// Attach a summary to a run whose record step died before writing one, and
/// dump it since the ledger never saw it.
fn seal_unrecorded(state: &mut OperationalState, reports: &dyn ReportPort) {
    let mut summary = summarize(state, None);
    summary.status = RunStatus::Failed;
    summary
        .fault
        .get_or_insert_with(|| format!("{}: run was not recorded", RECORD_AND_REPORT));
    error!(run_id = %state.run_id(), "run finished without a ledger record");
    if let Err(e) = state.set_summary(summary) {
        error!(run_id = %state.run_id(), error = %e, "could not attach summary");
    }
    dump_fallback(reports, state);
}

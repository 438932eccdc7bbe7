#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tradeloop::domain::call::{CallPolicy, RetryPolicy};
use tradeloop::domain::error::TradeloopError;
use tradeloop::domain::learning::LearningReport;
use tradeloop::domain::ledger::{
    FillKind, LedgerAggregate, NewTradeRecord, PnlHorizon, RealizedPnl, RunSummary, TradeReceipt,
    TradeRecord,
};
use tradeloop::domain::market::{
    Holding, MarketAnalysis, OrderAck, PortfolioSnapshot, ProposedAction, Quote, Side, TradePlan,
};
use tradeloop::domain::performance::RankedTrade;
use tradeloop::domain::rules::{PatternSet, RuleCandidate, RuleSetVersion};
use tradeloop::ports::execution_port::OrderExecutionProvider;
use tradeloop::ports::ledger_port::LedgerPort;
use tradeloop::ports::market_data_port::MarketDataProvider;
use tradeloop::ports::notification_port::NotificationSink;
use tradeloop::ports::oracle_port::DecisionOracle;
use tradeloop::ports::report_port::ReportPort;

/// Short timeouts and near-instant retries.
pub fn fast_calls() -> CallPolicy {
    CallPolicy {
        read_timeout: Duration::from_millis(200),
        oracle_timeout: Duration::from_millis(200),
        submit_timeout: Duration::from_millis(200),
        retry: RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        },
    }
}

pub fn buy(ticker: &str, quantity: i64, price: f64) -> ProposedAction {
    ProposedAction {
        ticker: ticker.to_string(),
        side: Side::Buy,
        quantity,
        price,
        reason: format!("accumulate {ticker}"),
    }
}

pub fn sell(ticker: &str, quantity: i64, price: f64) -> ProposedAction {
    ProposedAction {
        side: Side::Sell,
        reason: format!("reduce {ticker}"),
        ..buy(ticker, quantity, price)
    }
}

pub fn plan(actions: Vec<ProposedAction>) -> TradePlan {
    TradePlan {
        actions,
        justification: "test plan".to_string(),
        confidence: 0.8,
    }
}

pub fn candidate(category: &str, text: &str, condition: &str, priority: i32) -> RuleCandidate {
    RuleCandidate {
        category: category.to_string(),
        text: text.to_string(),
        condition: condition.to_string(),
        action: "skip_buy".to_string(),
        priority,
        rationale: "repeated losses".to_string(),
        deprecates: vec![],
    }
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

pub struct MockMarket {
    pub cash: f64,
    pub holdings: Vec<Holding>,
    pub quotes: BTreeMap<String, f64>,
    pub rankings: Vec<String>,
    pub fail_portfolio: bool,
    pub portfolio_delay: Option<Duration>,
    pub portfolio_calls: AtomicUsize,
}

impl MockMarket {
    pub fn new(cash: f64) -> Self {
        Self {
            cash,
            holdings: Vec::new(),
            quotes: BTreeMap::new(),
            rankings: Vec::new(),
            fail_portfolio: false,
            portfolio_delay: None,
            portfolio_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_quote(mut self, ticker: &str, price: f64) -> Self {
        self.quotes.insert(ticker.to_string(), price);
        self
    }

    pub fn with_holding(mut self, ticker: &str, quantity: i64, price: f64) -> Self {
        self.holdings.push(Holding {
            ticker: ticker.to_string(),
            quantity,
            avg_price: price,
            current_price: price,
        });
        self.quotes.insert(ticker.to_string(), price);
        self
    }

    /// Holding bought at `avg_price` now quoted at `current_price`.
    pub fn with_position(
        mut self,
        ticker: &str,
        quantity: i64,
        avg_price: f64,
        current_price: f64,
    ) -> Self {
        self = self.with_holding(ticker, quantity, current_price);
        if let Some(holding) = self.holdings.last_mut() {
            holding.avg_price = avg_price;
        }
        self
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            portfolio_delay: Some(delay),
            ..Self::new(1_000_000.0)
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_portfolio: true,
            ..Self::new(0.0)
        }
    }
}

#[async_trait]
impl MarketDataProvider for MockMarket {
    async fn portfolio(&self) -> Result<PortfolioSnapshot, TradeloopError> {
        self.portfolio_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.portfolio_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_portfolio {
            return Err(TradeloopError::external("broker", "connection refused"));
        }
        Ok(PortfolioSnapshot {
            cash: self.cash,
            holdings: self.holdings.clone(),
            taken_at: Utc::now(),
        })
    }

    async fn quote(&self, ticker: &str) -> Result<Quote, TradeloopError> {
        let price = self
            .quotes
            .get(ticker)
            .copied()
            .ok_or_else(|| TradeloopError::external("broker", format!("no quote for {ticker}")))?;
        Ok(Quote {
            ticker: ticker.to_string(),
            price,
            change_pct: 0.0,
            volume: 1_000,
            quoted_at: Utc::now(),
        })
    }

    async fn rankings(&self, _criteria: &str) -> Result<Vec<String>, TradeloopError> {
        Ok(self.rankings.clone())
    }
}

// ---------------------------------------------------------------------------
// Order execution
// ---------------------------------------------------------------------------

pub struct MockBroker {
    pub capacity: BTreeMap<String, i64>,
    pub default_capacity: i64,
    pub reject: HashSet<String>,
    pub partial: BTreeMap<String, i64>,
    pub submissions: Mutex<Vec<(String, Side, i64, f64)>>,
    pub capacity_calls: AtomicUsize,
}

impl MockBroker {
    pub fn new(default_capacity: i64) -> Self {
        Self {
            capacity: BTreeMap::new(),
            default_capacity,
            reject: HashSet::new(),
            partial: BTreeMap::new(),
            submissions: Mutex::new(Vec::new()),
            capacity_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_capacity(mut self, ticker: &str, capacity: i64) -> Self {
        self.capacity.insert(ticker.to_string(), capacity);
        self
    }

    pub fn rejecting(mut self, ticker: &str) -> Self {
        self.reject.insert(ticker.to_string());
        self
    }

    /// Fill at most `filled` shares of any order for `ticker`.
    pub fn partially_filling(mut self, ticker: &str, filled: i64) -> Self {
        self.partial.insert(ticker.to_string(), filled);
        self
    }

    pub fn submitted(&self) -> Vec<(String, Side, i64, f64)> {
        self.submissions.lock().unwrap().clone()
    }

    fn capacity_of(&self, ticker: &str) -> i64 {
        self.capacity_calls.fetch_add(1, Ordering::SeqCst);
        self.capacity
            .get(ticker)
            .copied()
            .unwrap_or(self.default_capacity)
    }
}

#[async_trait]
impl OrderExecutionProvider for MockBroker {
    async fn buy_capacity(&self, ticker: &str, _price: f64) -> Result<i64, TradeloopError> {
        Ok(self.capacity_of(ticker))
    }

    async fn sell_capacity(&self, ticker: &str) -> Result<i64, TradeloopError> {
        Ok(self.capacity_of(ticker))
    }

    async fn submit_order(
        &self,
        ticker: &str,
        side: Side,
        quantity: i64,
        price: f64,
    ) -> Result<OrderAck, TradeloopError> {
        let order_id = {
            let mut submissions = self.submissions.lock().unwrap();
            submissions.push((ticker.to_string(), side, quantity, price));
            format!("ord-{}", submissions.len())
        };
        if self.reject.contains(ticker) {
            return Err(TradeloopError::external("broker", "order rejected by exchange"));
        }
        let filled_quantity = self
            .partial
            .get(ticker)
            .map_or(quantity, |cap| quantity.min(*cap));
        Ok(OrderAck {
            order_id,
            filled_quantity,
            fill_price: price,
        })
    }
}

// ---------------------------------------------------------------------------
// Oracle
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockOracle {
    pub plan: Mutex<Option<TradePlan>>,
    pub patterns: PatternSet,
    pub candidates: Vec<RuleCandidate>,
    pub seen_versions: Mutex<Vec<u64>>,
    pub plan_calls: AtomicUsize,
    pub diagnose_calls: AtomicUsize,
    pub propose_calls: AtomicUsize,
}

impl MockOracle {
    pub fn planning(plan: TradePlan) -> Self {
        Self {
            plan: Mutex::new(Some(plan)),
            ..Self::default()
        }
    }

    pub fn proposing(patterns: Vec<&str>, candidates: Vec<RuleCandidate>) -> Self {
        Self {
            patterns: PatternSet {
                patterns: patterns.into_iter().map(str::to_string).collect(),
                notes: serde_json::Value::Null,
            },
            candidates,
            ..Self::default()
        }
    }
}

#[async_trait]
impl DecisionOracle for MockOracle {
    async fn generate_plan(
        &self,
        _portfolio: &PortfolioSnapshot,
        _analysis: &MarketAnalysis,
        ruleset: &RuleSetVersion,
    ) -> Result<TradePlan, TradeloopError> {
        self.plan_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_versions.lock().unwrap().push(ruleset.id);
        Ok(self
            .plan
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| plan(Vec::new())))
    }

    async fn diagnose_failures(
        &self,
        _worst_trades: &[RankedTrade],
        _stats: &serde_json::Value,
    ) -> Result<PatternSet, TradeloopError> {
        self.diagnose_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.patterns.clone())
    }

    async fn propose_rules(
        &self,
        _patterns: &PatternSet,
    ) -> Result<Vec<RuleCandidate>, TradeloopError> {
        self.propose_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.candidates.clone())
    }
}

// ---------------------------------------------------------------------------
// Notification and reports
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<String>>,
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn send(&self, report: &str) -> Result<(), TradeloopError> {
        self.sent.lock().unwrap().push(report.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryReports {
    pub learning: Mutex<Vec<LearningReport>>,
    pub fallbacks: Mutex<Vec<(String, serde_json::Value)>>,
}

impl ReportPort for MemoryReports {
    fn write_learning_report(&self, report: &LearningReport) -> Result<(), TradeloopError> {
        self.learning.lock().unwrap().push(report.clone());
        Ok(())
    }

    fn write_fallback(
        &self,
        label: &str,
        payload: &serde_json::Value,
    ) -> Result<(), TradeloopError> {
        self.fallbacks
            .lock()
            .unwrap()
            .push((label.to_string(), payload.clone()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryLedger {
    pub trades: Mutex<Vec<TradeRecord>>,
    pub runs: Mutex<Vec<RunSummary>>,
    pub fail_trades: bool,
    pub fail_runs: bool,
}

impl MemoryLedger {
    pub fn failing_runs() -> Self {
        Self {
            fail_runs: true,
            ..Self::default()
        }
    }

    pub fn failing_trades() -> Self {
        Self {
            fail_trades: true,
            ..Self::default()
        }
    }

    /// Seed a trade executed `days_ago` days back with a realized short P&L.
    pub fn seed(&self, ticker: &str, days_ago: i64, pnl_short: Option<f64>) -> i64 {
        let mut trades = self.trades.lock().unwrap();
        let id = trades.len() as i64 + 1;
        trades.push(TradeRecord {
            id,
            core: NewTradeRecord {
                run_id: "run-seed".to_string(),
                ticker: ticker.to_string(),
                side: Side::Buy,
                quantity: 10,
                price: 100.0,
                executed_at: Utc::now() - chrono::Duration::days(days_ago),
                justification: "seeded".to_string(),
                order_ref: None,
                receipt: TradeReceipt {
                    fill: FillKind::Full,
                    planned_quantity: 10,
                    submitted_quantity: 10,
                    note: None,
                },
                market_context: serde_json::Value::Null,
                portfolio_before: serde_json::Value::Null,
            },
            pnl_short,
            pnl_long: None,
        });
        id
    }

    pub fn trade_count(&self) -> usize {
        self.trades.lock().unwrap().len()
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }
}

impl LedgerPort for MemoryLedger {
    fn append_trade(&self, record: &NewTradeRecord) -> Result<i64, TradeloopError> {
        if self.fail_trades {
            return Err(TradeloopError::Database {
                reason: "disk I/O error".into(),
            });
        }
        let mut trades = self.trades.lock().unwrap();
        let id = trades.len() as i64 + 1;
        trades.push(TradeRecord {
            id,
            core: record.clone(),
            pnl_short: None,
            pnl_long: None,
        });
        Ok(id)
    }

    fn record_realized_pnl(&self, id: i64, pnl: RealizedPnl) -> Result<(), TradeloopError> {
        let mut trades = self.trades.lock().unwrap();
        let trade = trades
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(TradeloopError::RecordNotFound { id })?;
        if pnl.short.is_some() {
            trade.pnl_short = pnl.short;
        }
        if pnl.long.is_some() {
            trade.pnl_long = pnl.long;
        }
        Ok(())
    }

    fn get_trade(&self, id: i64) -> Result<Option<TradeRecord>, TradeloopError> {
        Ok(self.trades.lock().unwrap().iter().find(|t| t.id == id).cloned())
    }

    fn trades_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TradeRecord>, TradeloopError> {
        Ok(self
            .trades
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.core.executed_at >= start && t.core.executed_at < end)
            .cloned()
            .collect())
    }

    fn aggregate(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        horizon: PnlHorizon,
    ) -> Result<LedgerAggregate, TradeloopError> {
        let records = self.trades_between(start, end)?;
        Ok(LedgerAggregate::from_records(&records, horizon))
    }

    fn pending_pnl(&self, before: DateTime<Utc>) -> Result<Vec<TradeRecord>, TradeloopError> {
        Ok(self
            .trades
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.core.executed_at < before && (t.pnl_short.is_none() || t.pnl_long.is_none()))
            .cloned()
            .collect())
    }

    fn append_run(&self, summary: &RunSummary) -> Result<(), TradeloopError> {
        if self.fail_runs {
            return Err(TradeloopError::Database {
                reason: "database is locked".into(),
            });
        }
        self.runs.lock().unwrap().push(summary.clone());
        Ok(())
    }

    fn recent_runs(&self, limit: usize) -> Result<Vec<RunSummary>, TradeloopError> {
        let runs = self.runs.lock().unwrap();
        Ok(runs.iter().rev().take(limit).cloned().collect())
    }
}

/// Bundle of mocks shared by a test, with handles kept for assertions.
pub struct Harness {
    pub market: Arc<MockMarket>,
    pub broker: Arc<MockBroker>,
    pub oracle: Arc<MockOracle>,
    pub notifier: Arc<RecordingNotifier>,
    pub ledger: Arc<MemoryLedger>,
    pub reports: Arc<MemoryReports>,
}

impl Harness {
    pub fn new(market: MockMarket, broker: MockBroker, oracle: MockOracle) -> Self {
        Self::with_ledger(market, broker, oracle, MemoryLedger::default())
    }

    pub fn with_ledger(
        market: MockMarket,
        broker: MockBroker,
        oracle: MockOracle,
        ledger: MemoryLedger,
    ) -> Self {
        Self {
            market: Arc::new(market),
            broker: Arc::new(broker),
            oracle: Arc::new(oracle),
            notifier: Arc::new(RecordingNotifier::default()),
            ledger: Arc::new(ledger),
            reports: Arc::new(MemoryReports::default()),
        }
    }

    pub fn operational_ports(&self) -> tradeloop::domain::operational::OperationalPorts {
        tradeloop::domain::operational::OperationalPorts {
            market: self.market.clone(),
            broker: self.broker.clone(),
            oracle: self.oracle.clone(),
            notifier: self.notifier.clone(),
            ledger: self.ledger.clone(),
            reports: self.reports.clone(),
        }
    }

    pub fn learning_ports(&self) -> tradeloop::domain::learning::LearningPorts {
        tradeloop::domain::learning::LearningPorts {
            oracle: self.oracle.clone(),
            ledger: self.ledger.clone(),
            reports: self.reports.clone(),
        }
    }
}

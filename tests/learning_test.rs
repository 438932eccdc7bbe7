mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::*;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tradeloop::adapters::fs_rule_adapter::FsRuleAdapter;
use tradeloop::domain::learning::{LearningOutcome, LearningPipeline, LearningSettings};
use tradeloop::domain::operational::{OperationalPipeline, OperationalSettings};
use tradeloop::domain::rule_store::RuleStore;
use tradeloop::domain::rules::{RuleCategory, VersionOrigin};

struct Fixture {
    harness: Harness,
    rules: Arc<RuleStore>,
    _dir: TempDir,
}

impl Fixture {
    fn new(oracle: MockOracle) -> Self {
        let dir = TempDir::new().unwrap();
        let artifacts = FsRuleAdapter::open(dir.path()).unwrap();
        let rules = Arc::new(RuleStore::open(Arc::new(artifacts)).unwrap());
        let harness = Harness::new(
            MockMarket::new(1_000_000.0),
            MockBroker::new(100),
            oracle,
        );
        Self {
            harness,
            rules,
            _dir: dir,
        }
    }

    fn pipeline(&self) -> LearningPipeline {
        LearningPipeline::new(
            self.harness.learning_ports(),
            Arc::clone(&self.rules),
            LearningSettings {
                calls: fast_calls(),
                ..LearningSettings::default()
            },
        )
    }

    fn seed_history(&self) {
        let ledger = &self.harness.ledger;
        ledger.seed("005930", 3, Some(-120.0));
        ledger.seed("000660", 2, Some(45.0));
        ledger.seed("035420", 1, Some(-30.0));
        ledger.seed("051910", 1, None);
        // outside the 30 day window
        ledger.seed("068270", 45, Some(-999.0));
    }
}

#[tokio::test]
async fn valid_candidates_publish_new_version() {
    let fixture = Fixture::new(MockOracle::proposing(
        vec!["bought after large gap-ups"],
        vec![
            candidate("entry", "skip gap-up buys", "ABOVE(gap_pct, 5)", 7),
            candidate("sentiment", "follow the news", "ABOVE(news_score, 0.5)", 5),
            candidate("exit", "cut losers early", "BELOW(pnl_pct", 6),
        ],
    ));
    fixture.seed_history();

    let state = fixture.pipeline().run_cycle(&CancellationToken::new()).await;

    assert_eq!(state.outcome(), LearningOutcome::Updated { version: 2 });
    assert_eq!(state.accepted().len(), 1);
    assert_eq!(state.dropped().len(), 2);
    assert!(state.dropped()[0].reason.contains("unknown category"));
    assert!(state.dropped()[1].reason.contains("bad condition"));

    let active = fixture.rules.active();
    assert_eq!(active.id, 2);
    assert_eq!(active.previous, Some(1));
    assert_eq!(active.origin, VersionOrigin::Learning);
    assert_eq!(active.rules.len(), 1);
    assert_eq!(active.rules[0].category, RuleCategory::Entry);

    let window = state.window().unwrap();
    assert_eq!(window.trade_count, 4);
    assert_eq!(window.pending, 1);
    assert_eq!(window.worst[0].ticker, "005930");

    let reports = fixture.harness.reports.learning.lock().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].previous_version, Some(1));
    assert_eq!(reports[0].new_version, Some(2));
}

#[tokio::test]
async fn insufficient_history_skips_oracle() {
    let fixture = Fixture::new(MockOracle::proposing(
        vec!["anything"],
        vec![candidate("entry", "x", "ABOVE(a, 1)", 5)],
    ));
    fixture.harness.ledger.seed("005930", 1, None);

    let state = fixture.pipeline().run_cycle(&CancellationToken::new()).await;

    assert!(matches!(state.outcome(), LearningOutcome::Skipped { .. }));
    assert_eq!(fixture.harness.oracle.diagnose_calls.load(Ordering::SeqCst), 0);
    assert_eq!(fixture.harness.oracle.propose_calls.load(Ordering::SeqCst), 0);
    assert_eq!(fixture.rules.active().id, 1);
    // the report is written regardless
    assert_eq!(fixture.harness.reports.learning.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn no_patterns_means_no_proposal() {
    let fixture = Fixture::new(MockOracle::proposing(vec![], vec![]));
    fixture.seed_history();

    let state = fixture.pipeline().run_cycle(&CancellationToken::new()).await;

    assert_eq!(state.outcome(), LearningOutcome::NoChange);
    assert_eq!(fixture.harness.oracle.diagnose_calls.load(Ordering::SeqCst), 1);
    assert_eq!(fixture.harness.oracle.propose_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn all_invalid_candidates_leave_rules_unchanged() {
    let fixture = Fixture::new(MockOracle::proposing(
        vec!["held losers too long"],
        vec![
            candidate("exit", "", "BELOW(pnl_pct, -5)", 5),
            candidate("exit", "cut at -5%", "BELOW(pnl_pct, -5)", 99),
        ],
    ));
    fixture.seed_history();

    let state = fixture.pipeline().run_cycle(&CancellationToken::new()).await;

    assert_eq!(state.outcome(), LearningOutcome::NoChange);
    assert_eq!(state.new_version(), None);
    assert_eq!(state.dropped().len(), 2);
    assert_eq!(fixture.rules.versions().unwrap().len(), 1);
}

#[tokio::test]
async fn next_operational_run_sees_learned_rules() {
    let fixture = Fixture::new(MockOracle::proposing(
        vec!["oversized positions"],
        vec![candidate(
            "risk_management",
            "cap positions at 20%",
            "ABOVE(position_pct, 0.2)",
            9,
        )],
    ));
    fixture.seed_history();

    fixture.pipeline().run_cycle(&CancellationToken::new()).await;

    let operational = OperationalPipeline::new(
        fixture.harness.operational_ports(),
        Arc::clone(&fixture.rules),
        OperationalSettings {
            calls: fast_calls(),
            ..OperationalSettings::default()
        },
    );
    let state = operational.run_once(&CancellationToken::new()).await;

    assert_eq!(*fixture.harness.oracle.seen_versions.lock().unwrap(), vec![2]);
    assert_eq!(state.rule_version(), Some(2));
}

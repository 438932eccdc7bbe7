use std::sync::Arc;

use tempfile::TempDir;
use tradeloop::adapters::fs_rule_adapter::FsRuleAdapter;
use tradeloop::domain::error::TradeloopError;
use tradeloop::domain::rules::{Rule, RuleCategory, VersionOrigin};
use tradeloop::domain::rule_store::RuleStore;

fn open(dir: &TempDir) -> RuleStore {
    let artifacts = FsRuleAdapter::open(dir.path()).unwrap();
    RuleStore::open(Arc::new(artifacts)).unwrap()
}

fn rule(n: usize) -> Rule {
    Rule {
        category: RuleCategory::Exit,
        text: format!("exit rule {n}"),
        condition: format!("BELOW(pnl_pct, -{n})"),
        action: "sell_all".into(),
        priority: 5,
        rationale: "drawdown".into(),
    }
}

#[test]
fn fresh_store_activates_empty_genesis() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let active = store.active();
    assert_eq!(active.id, 1);
    assert!(active.rules.is_empty());
    assert_eq!(store.history().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_updates_serialize_without_losing_rules() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(open(&dir));

    let mut handles = Vec::new();
    for n in 0..8 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store
                .update(VersionOrigin::Learning, move |current| {
                    let mut rules = current.rules.clone();
                    rules.push(rule(n));
                    rules
                })
                .await
                .map(|v| v.id)
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap());
    }
    ids.sort_unstable();
    assert_eq!(ids, (2..=9).collect::<Vec<u64>>());

    let active = store.active();
    assert_eq!(active.id, 9);
    assert_eq!(active.rules.len(), 8);

    // every link points at the version before it
    let history = store.history().unwrap();
    for window in history.windows(2) {
        assert_eq!(window[1].previous, Some(window[0].id));
        assert!(window[1].id > window[0].id);
    }
}

#[tokio::test]
async fn rollback_creates_a_new_version() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    store
        .update(VersionOrigin::Learning, |_| vec![rule(1)])
        .await
        .unwrap();
    store
        .update(VersionOrigin::Learning, |current| {
            let mut rules = current.rules.clone();
            rules.push(rule(2));
            rules
        })
        .await
        .unwrap();

    let restored = store.rollback(2).await.unwrap();

    assert_eq!(restored.id, 4);
    assert_eq!(restored.previous, Some(3));
    assert_eq!(restored.origin, VersionOrigin::Rollback { from: 2 });
    assert_eq!(restored.rules, vec![rule(1)]);
    // the version rolled away from is still there
    assert_eq!(store.version(3).unwrap().unwrap().rules.len(), 2);
    assert_eq!(store.active().id, 4);
}

#[tokio::test]
async fn rollback_to_unknown_version_fails() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let err = store.rollback(42).await.unwrap_err();
    assert!(matches!(err, TradeloopError::VersionNotFound { id: 42 }));
    assert_eq!(store.active().id, 1);
}

#[tokio::test]
async fn reopened_store_resumes_active_version() {
    let dir = TempDir::new().unwrap();
    {
        let store = open(&dir);
        store
            .update(VersionOrigin::Learning, |_| vec![rule(7)])
            .await
            .unwrap();
    }

    let reopened = open(&dir);
    assert_eq!(reopened.active().id, 2);
    assert_eq!(reopened.active().rules, vec![rule(7)]);
    assert_eq!(reopened.versions().unwrap().len(), 2);
}

#[tokio::test]
async fn snapshot_is_stable_across_updates() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let before = store.active();
    store
        .update(VersionOrigin::Learning, |_| vec![rule(3)])
        .await
        .unwrap();
    assert!(before.rules.is_empty());
    assert_eq!(store.active().rules.len(), 1);
}

#[tokio::test]
async fn rollback_by_another_handle_reaches_the_running_store() {
    let dir = TempDir::new().unwrap();
    let daemon = open(&dir);
    let operator = open(&dir);

    let v2 = daemon
        .update(VersionOrigin::Learning, |_| vec![rule(1)])
        .await
        .unwrap();
    assert_eq!(v2.id, 2);

    let v3 = operator.rollback(1).await.unwrap();
    assert_eq!(v3.id, 3);
    assert_eq!(v3.previous, Some(2));

    // the cached snapshot lags until the next refresh
    assert_eq!(daemon.active().id, 2);
    let seen = daemon.refresh().await.unwrap();
    assert_eq!(seen.id, 3);
    assert!(seen.rules.is_empty());

    let v4 = daemon
        .update(VersionOrigin::Learning, |current| {
            let mut rules = current.rules.clone();
            rules.push(rule(2));
            rules
        })
        .await
        .unwrap();
    assert_eq!(v4.id, 4);
    assert_eq!(v4.previous, Some(3));
    assert_eq!(v4.rules, vec![rule(2)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_handles_on_one_directory_never_reuse_an_id() {
    let dir = TempDir::new().unwrap();
    let stores = [Arc::new(open(&dir)), Arc::new(open(&dir))];

    let mut handles = Vec::new();
    for n in 0..8 {
        let store = Arc::clone(&stores[n % 2]);
        handles.push(tokio::spawn(async move {
            store
                .update(VersionOrigin::Learning, move |current| {
                    let mut rules = current.rules.clone();
                    rules.push(rule(n));
                    rules
                })
                .await
                .map(|v| v.id)
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap());
    }
    ids.sort_unstable();
    assert_eq!(ids, (2..=9).collect::<Vec<u64>>());

    let active = stores[0].refresh().await.unwrap();
    assert_eq!(active.id, 9);
    assert_eq!(active.rules.len(), 8);

    let history = stores[1].history().unwrap();
    assert_eq!(history.len(), 9);
    for window in history.windows(2) {
        assert_eq!(window[1].previous, Some(window[0].id));
    }
}

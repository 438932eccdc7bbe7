//! Drives the `tradeloop` binary against a paper setup in a temp directory.

#![cfg(feature = "sqlite")]

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

const SCRIPT: &str = r#"{
  "plans": [
    {"actions": [{"ticker": "005930", "side": "buy", "quantity": 500, "price": 70000, "reason": "breakout"}],
     "justification": "add exposure", "confidence": 0.6}
  ]
}"#;

fn write_setup(dir: &Path, extra: &str) -> std::path::PathBuf {
    let script = dir.join("script.json");
    fs::write(&script, SCRIPT).unwrap();
    let ini = format!(
        r#"
[storage]
ledger = sqlite:{root}/ledger.db
rules_dir = {root}/rules
reports_dir = {root}/reports

[paper]
cash = 1000000
quotes = 005930:70000, 000660:150000
script = {script}

{extra}
"#,
        root = dir.display(),
        script = script.display(),
        extra = extra
    );
    let path = dir.join("tradeloop.ini");
    fs::write(&path, ini).unwrap();
    path
}

fn tradeloop(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_tradeloop"))
        .args(args)
        .env("RUST_LOG", "error")
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn run_once_clamps_and_records() {
    let dir = TempDir::new().unwrap();
    let config = write_setup(dir.path(), "");
    let config = config.to_str().unwrap();

    let run = tradeloop(&["run-once", "-c", config]);
    assert!(run.status.success());
    let report = stdout(&run);
    assert!(report.contains("finished: success"));
    // 1,000,000 cash buys at most 14 shares at 70,000
    assert!(report.contains("clamped from 500 to 14"));

    let pending = tradeloop(&["pending-pnl", "-c", config]);
    assert!(pending.status.success());
    assert!(stdout(&pending).contains("1 trades awaiting P&L"));

    let set = tradeloop(&["set-pnl", "-c", config, "--id", "1", "--short", "-2500"]);
    assert!(set.status.success());

    let performance = tradeloop(&["performance", "-c", config, "--days", "7"]);
    assert!(performance.status.success());
    let text = stdout(&performance);
    assert!(text.contains("1 trades, 0 pending"));
    assert!(text.contains("Losses 1"));
}

#[test]
fn versions_and_rollback() {
    let dir = TempDir::new().unwrap();
    let config = write_setup(dir.path(), "");
    let config = config.to_str().unwrap();

    let versions = tradeloop(&["versions", "-c", config]);
    assert!(versions.status.success());
    assert!(stdout(&versions).contains("genesis"));

    let rollback = tradeloop(&["rollback", "-c", config, "--to", "1"]);
    assert!(rollback.status.success());
    assert!(stdout(&rollback).contains("Activated version 2"));

    let missing = tradeloop(&["rollback", "-c", config, "--to", "99"]);
    assert_eq!(missing.status.code(), Some(3));
}

#[test]
fn learn_without_history_is_skipped() {
    let dir = TempDir::new().unwrap();
    let config = write_setup(dir.path(), "");
    let learn = tradeloop(&["learn", "-c", config.to_str().unwrap()]);
    assert!(learn.status.success());
    assert!(stdout(&learn).contains("skipped: insufficient history"));
}

#[test]
fn set_pnl_needs_a_value() {
    let dir = TempDir::new().unwrap();
    let config = write_setup(dir.path(), "");
    let output = tradeloop(&["set-pnl", "-c", config.to_str().unwrap(), "--id", "1"]);
    assert_eq!(output.status.code(), Some(4));
}

#[test]
fn missing_config_exits_with_config_code() {
    let output = tradeloop(&["versions", "-c", "/nonexistent/tradeloop.ini"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn invalid_settings_exit_with_config_code() {
    let dir = TempDir::new().unwrap();
    let config = write_setup(dir.path(), "[scheduler]\noperational_interval_secs = 0\n");
    let output = tradeloop(&["run-once", "-c", config.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("operational_interval_secs"));
}

#[test]
fn performance_window_is_bounded() {
    let dir = TempDir::new().unwrap();
    let config = write_setup(dir.path(), "");
    let config = config.to_str().unwrap();
    for days in ["0", "3651", "100000000", "9223372036854775807"] {
        let output = tradeloop(&["performance", "-c", config, "--days", days]);
        assert_eq!(output.status.code(), Some(4), "--days {days}");
    }
    let output = tradeloop(&["performance", "-c", config, "--days", "3650"]);
    assert!(output.status.success());
}

#[test]
fn position_limit_from_config_caps_the_order() {
    let dir = TempDir::new().unwrap();
    let config = write_setup(dir.path(), "[risk]\nmax_position_pct = 10\n");
    let run = tradeloop(&["run-once", "-c", config.to_str().unwrap()]);
    assert!(run.status.success());
    // 10% of 1,000,000 buys one share at 70,000
    assert!(stdout(&run).contains("clamped from 500 to 1 by position limit 10%"));
}

#[test]
fn out_of_range_risk_limit_exits_with_config_code() {
    let dir = TempDir::new().unwrap();
    let config = write_setup(dir.path(), "[risk]\nmax_daily_loss_pct = 150\n");
    let output = tradeloop(&["run-once", "-c", config.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("max_daily_loss_pct"));
}

//! Configuration validation.
//!
//! Checks every section up front and builds the typed [`Settings`] the
//! pipelines and adapters are constructed from.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::domain::call::{CallPolicy, RetryPolicy};
use crate::domain::error::TradeloopError;
use crate::domain::learning::LearningSettings;
use crate::domain::ledger::PnlHorizon;
use crate::domain::operational::{OperationalSettings, RiskLimits};
use crate::domain::performance::MAX_WINDOW_DAYS;
use crate::domain::scheduler::Cadence;
use crate::ports::config_port::ConfigPort;

/// Where the trade ledger lives.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerTarget {
    Sqlite(PathBuf),
    Postgres(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorageSettings {
    pub ledger: LedgerTarget,
    pub rules_dir: PathBuf,
    pub reports_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaperHolding {
    pub ticker: String,
    pub quantity: i64,
    pub avg_price: f64,
}

/// Seed book for the paper broker and script for the replay oracle.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PaperSettings {
    pub cash: f64,
    pub holdings: Vec<PaperHolding>,
    pub quotes: BTreeMap<String, f64>,
    pub script: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub cadence: Cadence,
    pub operational: OperationalSettings,
    pub learning: LearningSettings,
    pub storage: StorageSettings,
    pub paper: PaperSettings,
}

pub fn load_settings(config: &dyn ConfigPort) -> Result<Settings, TradeloopError> {
    let calls = validate_calls(config)?;
    Ok(Settings {
        cadence: validate_cadence(config)?,
        operational: validate_market(config, calls.clone())?,
        learning: validate_learning(config, calls)?,
        storage: validate_storage(config)?,
        paper: validate_paper(config)?,
    })
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> TradeloopError {
    TradeloopError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn positive(config: &dyn ConfigPort, section: &str, key: &str, default: i64) -> Result<u64, TradeloopError> {
    let value = config.get_int(section, key, default);
    if value <= 0 {
        return Err(invalid(section, key, format!("{} must be positive", key)));
    }
    Ok(value as u64)
}

fn validate_cadence(config: &dyn ConfigPort) -> Result<Cadence, TradeloopError> {
    let defaults = Cadence::default();
    let operational = positive(
        config,
        "scheduler",
        "operational_interval_secs",
        defaults.operational.as_secs() as i64,
    )?;
    let learning = positive(
        config,
        "scheduler",
        "learning_interval_secs",
        defaults.learning.as_secs() as i64,
    )?;
    if learning < operational {
        return Err(invalid(
            "scheduler",
            "learning_interval_secs",
            "learning interval must not be shorter than the operational interval",
        ));
    }
    Ok(Cadence {
        operational: Duration::from_secs(operational),
        learning: Duration::from_secs(learning),
    })
}

fn validate_calls(config: &dyn ConfigPort) -> Result<CallPolicy, TradeloopError> {
    let defaults = CallPolicy::default();
    let read = positive(config, "timeouts", "read_secs", defaults.read_timeout.as_secs() as i64)?;
    let oracle = positive(
        config,
        "timeouts",
        "oracle_secs",
        defaults.oracle_timeout.as_secs() as i64,
    )?;
    let submit = positive(
        config,
        "timeouts",
        "submit_secs",
        defaults.submit_timeout.as_secs() as i64,
    )?;

    let retry_defaults = RetryPolicy::default();
    let max_attempts = positive(
        config,
        "retry",
        "max_attempts",
        retry_defaults.max_attempts as i64,
    )?;
    let initial = positive(
        config,
        "retry",
        "initial_backoff_ms",
        retry_defaults.initial_backoff.as_millis() as i64,
    )?;
    let max = positive(
        config,
        "retry",
        "max_backoff_ms",
        retry_defaults.max_backoff.as_millis() as i64,
    )?;
    if initial > max {
        return Err(invalid(
            "retry",
            "initial_backoff_ms",
            "initial_backoff_ms must not exceed max_backoff_ms",
        ));
    }

    Ok(CallPolicy {
        read_timeout: Duration::from_secs(read),
        oracle_timeout: Duration::from_secs(oracle),
        submit_timeout: Duration::from_secs(submit),
        retry: RetryPolicy {
            max_attempts: max_attempts.min(u32::MAX as u64) as u32,
            initial_backoff: Duration::from_millis(initial),
            max_backoff: Duration::from_millis(max),
        },
    })
}

fn validate_market(config: &dyn ConfigPort, calls: CallPolicy) -> Result<OperationalSettings, TradeloopError> {
    let rankings = config.get_list("market", "rankings");
    let max_ranked = config.get_int("market", "max_ranked", 10);
    if max_ranked < 0 {
        return Err(invalid("market", "max_ranked", "max_ranked must be non-negative"));
    }
    Ok(OperationalSettings {
        calls,
        rankings,
        max_ranked: max_ranked as usize,
        risk: validate_risk(config)?,
    })
}

/// Optional percentage in (0, 100]. Absent disables the limit.
fn percent(config: &dyn ConfigPort, section: &str, key: &str) -> Result<Option<f64>, TradeloopError> {
    let Some(raw) = config.get_string(section, key) else {
        return Ok(None);
    };
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| invalid(section, key, format!("expected a percentage, got '{}'", raw)))?;
    if !(value > 0.0 && value <= 100.0) {
        return Err(invalid(section, key, format!("{} must be within (0, 100]", key)));
    }
    Ok(Some(value))
}

fn validate_risk(config: &dyn ConfigPort) -> Result<RiskLimits, TradeloopError> {
    Ok(RiskLimits {
        max_position_pct: percent(config, "risk", "max_position_pct")?,
        max_daily_loss_pct: percent(config, "risk", "max_daily_loss_pct")?,
    })
}

fn validate_learning(config: &dyn ConfigPort, calls: CallPolicy) -> Result<LearningSettings, TradeloopError> {
    let defaults = LearningSettings::default();
    let window_days = positive(config, "learning", "window_days", defaults.window_days)?;
    if window_days > MAX_WINDOW_DAYS as u64 {
        return Err(invalid(
            "learning",
            "window_days",
            format!("window_days must not exceed {}", MAX_WINDOW_DAYS),
        ));
    }
    let top_k = positive(config, "learning", "top_k", defaults.top_k as i64)?;
    let horizon = match config.get_string("learning", "horizon") {
        None => defaults.horizon,
        Some(s) => PnlHorizon::parse(s.trim())
            .ok_or_else(|| invalid("learning", "horizon", format!("expected short or long, got '{}'", s)))?,
    };
    Ok(LearningSettings {
        calls,
        window_days: window_days as i64,
        top_k: top_k as usize,
        horizon,
    })
}

fn validate_storage(config: &dyn ConfigPort) -> Result<StorageSettings, TradeloopError> {
    let ledger = match config.get_string("storage", "ledger") {
        None => LedgerTarget::Sqlite(PathBuf::from("tradeloop.db")),
        Some(s) => parse_ledger_target(&s)?,
    };
    let rules_dir = config
        .get_string("storage", "rules_dir")
        .unwrap_or_else(|| "rules".to_string());
    let reports_dir = config
        .get_string("storage", "reports_dir")
        .unwrap_or_else(|| "reports".to_string());
    Ok(StorageSettings {
        ledger,
        rules_dir: PathBuf::from(rules_dir),
        reports_dir: PathBuf::from(reports_dir),
    })
}

/// `sqlite:<path>` or `postgres:<conninfo>`.
pub fn parse_ledger_target(value: &str) -> Result<LedgerTarget, TradeloopError> {
    let value = value.trim();
    match value.split_once(':') {
        Some(("sqlite", path)) if !path.trim().is_empty() => {
            Ok(LedgerTarget::Sqlite(PathBuf::from(path.trim())))
        }
        Some(("postgres", conninfo)) if !conninfo.trim().is_empty() => {
            Ok(LedgerTarget::Postgres(conninfo.trim().to_string()))
        }
        _ => Err(invalid(
            "storage",
            "ledger",
            format!("expected sqlite:<path> or postgres:<conninfo>, got '{}'", value),
        )),
    }
}

fn validate_paper(config: &dyn ConfigPort) -> Result<PaperSettings, TradeloopError> {
    let cash = config.get_double("paper", "cash", 0.0);
    if !cash.is_finite() || cash < 0.0 {
        return Err(invalid("paper", "cash", "cash must be non-negative"));
    }

    let mut holdings = Vec::new();
    for entry in config.get_list("paper", "holdings") {
        let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
        let holding = match parts.as_slice() {
            [ticker, quantity, avg_price] if !ticker.is_empty() => {
                match (quantity.parse::<i64>(), avg_price.parse::<f64>()) {
                    (Ok(q), Ok(p)) if q > 0 && p > 0.0 => Some(PaperHolding {
                        ticker: ticker.to_string(),
                        quantity: q,
                        avg_price: p,
                    }),
                    _ => None,
                }
            }
            _ => None,
        };
        match holding {
            Some(h) => holdings.push(h),
            None => {
                return Err(invalid(
                    "paper",
                    "holdings",
                    format!("expected ticker:quantity:avg_price, got '{}'", entry),
                ));
            }
        }
    }

    let mut quotes = BTreeMap::new();
    for entry in config.get_list("paper", "quotes") {
        match entry.split_once(':') {
            Some((ticker, price)) => match price.trim().parse::<f64>() {
                Ok(p) if p > 0.0 && !ticker.trim().is_empty() => {
                    quotes.insert(ticker.trim().to_string(), p);
                }
                _ => {
                    return Err(invalid(
                        "paper",
                        "quotes",
                        format!("invalid price in '{}'", entry),
                    ));
                }
            },
            None => {
                return Err(invalid(
                    "paper",
                    "quotes",
                    format!("expected ticker:price, got '{}'", entry),
                ));
            }
        }
    }

    for holding in &holdings {
        if !quotes.contains_key(&holding.ticker) {
            return Err(invalid(
                "paper",
                "quotes",
                format!("no quote for held ticker {}", holding.ticker),
            ));
        }
    }

    Ok(PaperSettings {
        cash,
        holdings,
        quotes,
        script: config.get_string("paper", "script").map(PathBuf::from),
    })
}

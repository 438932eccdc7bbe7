//! CLI definition and dispatch.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::fs_rule_adapter::FsRuleAdapter;
use crate::adapters::json_report_adapter::JsonReportAdapter;
use crate::adapters::log_notifier::LogNotifier;
use crate::adapters::paper_broker::PaperBroker;
use crate::adapters::replay_oracle::ReplayOracle;
use crate::domain::config_validation::{load_settings, LedgerTarget, Settings};
use crate::domain::error::TradeloopError;
use crate::domain::learning::{LearningOutcome, LearningPipeline, LearningPorts};
use crate::domain::ledger::{LedgerAggregate, RealizedPnl, RunStatus};
use crate::domain::operational::{OperationalPipeline, OperationalPorts};
use crate::domain::performance::{window_start, PerformanceWindow};
use crate::domain::rule_store::RuleStore;
use crate::domain::scheduler::Scheduler;
use crate::logging::init_tracing;
use crate::ports::config_port::ConfigPort;
use crate::ports::ledger_port::LedgerPort;

#[derive(Parser, Debug)]
#[command(name = "tradeloop", about = "Dual-cadence trading orchestration engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start both schedules with the paper adapters until Ctrl-C
    Run {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Execute one operational run and print its report
    RunOnce {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Execute one learning cycle
    Learn {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// List rule set versions
    Versions {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Reactivate an earlier rule set version
    Rollback {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        to: u64,
    },
    /// Summarize ledger performance over recent days
    Performance {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long, default_value_t = 30)]
        days: i64,
    },
    /// List trades still waiting for realized P&L
    PendingPnl {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Record realized P&L for a trade
    SetPnl {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        id: i64,
        #[arg(long, allow_negative_numbers = true)]
        short: Option<f64>,
        #[arg(long, allow_negative_numbers = true)]
        long: Option<f64>,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Run { config } => run_schedules(&config),
        Command::RunOnce { config } => run_operational_once(&config),
        Command::Learn { config } => run_learning_once(&config),
        Command::Versions { config } => run_versions(&config),
        Command::Rollback { config, to } => run_rollback(&config, to),
        Command::Performance { config, days } => run_performance(&config, days),
        Command::PendingPnl { config } => run_pending_pnl(&config),
        Command::SetPnl {
            config,
            id,
            short,
            long,
        } => run_set_pnl(&config, id, RealizedPnl { short, long }),
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|err| {
        eprintln!("error: {err}");
        ExitCode::from(&err)
    })
}

fn fail(err: TradeloopError) -> ExitCode {
    eprintln!("error: {err}");
    (&err).into()
}

/// Config, validated settings and an installed subscriber.
struct Loaded {
    config: FileConfigAdapter,
    settings: Settings,
    _log_guard: Option<WorkerGuard>,
}

fn load(path: &Path) -> Result<Loaded, ExitCode> {
    let config = load_config(path)?;
    let settings = load_settings(&config).map_err(fail)?;
    let log_dir = config.get_string("logging", "dir").map(PathBuf::from);
    let log_guard = init_tracing(log_dir.as_deref()).map_err(fail)?;
    Ok(Loaded {
        config,
        settings,
        _log_guard: log_guard,
    })
}

fn open_ledger(
    config: &dyn ConfigPort,
    settings: &Settings,
) -> Result<Arc<dyn LedgerPort>, TradeloopError> {
    let pool_size = config.get_int("storage", "pool_size", 4).max(1) as u32;
    match &settings.storage.ledger {
        #[cfg(feature = "sqlite")]
        LedgerTarget::Sqlite(path) => Ok(Arc::new(
            crate::adapters::sqlite_adapter::SqliteAdapter::open(path, pool_size)?,
        )),
        #[cfg(feature = "postgres")]
        LedgerTarget::Postgres(conninfo) => Ok(Arc::new(
            crate::adapters::postgres_adapter::PostgresAdapter::connect(conninfo, pool_size)?,
        )),
        #[allow(unreachable_patterns)]
        other => Err(TradeloopError::ConfigInvalid {
            section: "storage".into(),
            key: "ledger".into(),
            reason: format!("{:?} is not supported by this build", other),
        }),
    }
}

fn open_rules(settings: &Settings) -> Result<Arc<RuleStore>, TradeloopError> {
    let artifacts = FsRuleAdapter::open(&settings.storage.rules_dir)?;
    Ok(Arc::new(RuleStore::open(Arc::new(artifacts))?))
}

/// Both pipelines wired to the paper adapters.
struct Engine {
    operational: OperationalPipeline,
    learning: LearningPipeline,
}

fn build_engine(loaded: &Loaded) -> Result<Engine, TradeloopError> {
    let settings = &loaded.settings;
    let ledger = open_ledger(&loaded.config, settings)?;
    let rules = open_rules(settings)?;
    let reports = Arc::new(JsonReportAdapter::new(&settings.storage.reports_dir));
    let broker = Arc::new(PaperBroker::new(&settings.paper));
    let oracle: Arc<ReplayOracle> = match &settings.paper.script {
        Some(path) => Arc::new(ReplayOracle::from_file(path)?),
        None => {
            warn!("no [paper] script configured, oracle will hold");
            Arc::new(ReplayOracle::idle())
        }
    };

    let operational = OperationalPipeline::new(
        OperationalPorts {
            market: broker.clone(),
            broker,
            oracle: oracle.clone(),
            notifier: Arc::new(LogNotifier),
            ledger: ledger.clone(),
            reports: reports.clone(),
        },
        Arc::clone(&rules),
        settings.operational.clone(),
    );
    let learning = LearningPipeline::new(
        LearningPorts {
            oracle,
            ledger,
            reports,
        },
        rules,
        settings.learning.clone(),
    );
    Ok(Engine {
        operational,
        learning,
    })
}

fn runtime() -> Result<tokio::runtime::Runtime, ExitCode> {
    tokio::runtime::Runtime::new().map_err(|e| fail(TradeloopError::Io(e)))
}

fn run_schedules(config_path: &Path) -> ExitCode {
    let loaded = match load(config_path) {
        Ok(l) => l,
        Err(code) => return code,
    };
    let engine = match build_engine(&loaded) {
        Ok(e) => e,
        Err(e) => return fail(e),
    };
    let rt = match runtime() {
        Ok(rt) => rt,
        Err(code) => return code,
    };

    let scheduler = Arc::new(Scheduler::new(
        engine.operational,
        engine.learning,
        loaded.settings.cadence,
    ));
    let shutdown = CancellationToken::new();

    rt.block_on(async {
        let signal = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, finishing in-flight runs");
            }
            signal.cancel();
        });
        info!(
            operational_secs = loaded.settings.cadence.operational.as_secs(),
            learning_secs = loaded.settings.cadence.learning.as_secs(),
            "scheduler starting"
        );
        scheduler.run(shutdown).await;
    });
    ExitCode::SUCCESS
}

fn run_operational_once(config_path: &Path) -> ExitCode {
    let loaded = match load(config_path) {
        Ok(l) => l,
        Err(code) => return code,
    };
    let engine = match build_engine(&loaded) {
        Ok(e) => e,
        Err(e) => return fail(e),
    };
    let rt = match runtime() {
        Ok(rt) => rt,
        Err(code) => return code,
    };

    let state = rt.block_on(engine.operational.run_once(&CancellationToken::new()));
    match state.summary() {
        Some(summary) => {
            println!("{}", summary.report);
            if summary.status == RunStatus::Failed {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        None => fail(TradeloopError::Internal {
            reason: format!("run {} produced no summary", state.run_id()),
        }),
    }
}

fn run_learning_once(config_path: &Path) -> ExitCode {
    let loaded = match load(config_path) {
        Ok(l) => l,
        Err(code) => return code,
    };
    let engine = match build_engine(&loaded) {
        Ok(e) => e,
        Err(e) => return fail(e),
    };
    let rt = match runtime() {
        Ok(rt) => rt,
        Err(code) => return code,
    };

    let state = rt.block_on(engine.learning.run_cycle(&CancellationToken::new()));
    let outcome = state.outcome();
    println!("{}: {}", state.cycle_id(), outcome);
    match outcome {
        LearningOutcome::Failed { .. } => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    }
}

fn run_versions(config_path: &Path) -> ExitCode {
    let loaded = match load(config_path) {
        Ok(l) => l,
        Err(code) => return code,
    };
    let rules = match open_rules(&loaded.settings) {
        Ok(r) => r,
        Err(e) => return fail(e),
    };
    let versions = match rules.versions() {
        Ok(v) => v,
        Err(e) => return fail(e),
    };

    let active = rules.active().id;
    println!(
        "{:<2} {:>6}  {:<10}  {:>5}  {:>8}  created",
        "", "id", "origin", "rules", "previous"
    );
    for v in versions {
        println!(
            "{:<2} {:>6}  {:<10}  {:>5}  {:>8}  {}",
            if v.id == active { "*" } else { "" },
            v.id,
            format!("{:?}", v.origin).to_lowercase(),
            v.rules.len(),
            v.previous.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
            v.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    let current = rules.active();
    let counts: Vec<String> = current
        .category_counts()
        .into_iter()
        .map(|(category, n)| format!("{} {}", category.as_str(), n))
        .collect();
    if !counts.is_empty() {
        println!();
        println!("Active version {}: {}", current.id, counts.join(", "));
    }
    ExitCode::SUCCESS
}

fn run_rollback(config_path: &Path, target: u64) -> ExitCode {
    let loaded = match load(config_path) {
        Ok(l) => l,
        Err(code) => return code,
    };
    let rules = match open_rules(&loaded.settings) {
        Ok(r) => r,
        Err(e) => return fail(e),
    };
    let rt = match runtime() {
        Ok(rt) => rt,
        Err(code) => return code,
    };

    match rt.block_on(rules.rollback(target)) {
        Ok(version) => {
            println!(
                "Activated version {} (copy of {}, {} rules)",
                version.id,
                target,
                version.rules.len()
            );
            ExitCode::SUCCESS
        }
        Err(e) => fail(e),
    }
}

fn run_performance(config_path: &Path, days: i64) -> ExitCode {
    let loaded = match load(config_path) {
        Ok(l) => l,
        Err(code) => return code,
    };
    let end = Utc::now();
    let start = match window_start(end, days) {
        Ok(start) => start,
        Err(e) => return fail(e),
    };
    let ledger = match open_ledger(&loaded.config, &loaded.settings) {
        Ok(l) => l,
        Err(e) => return fail(e),
    };

    let horizon = loaded.settings.learning.horizon;
    let window = ledger.aggregate(start, end, horizon).and_then(|aggregate| {
        let records = ledger.trades_between(start, end)?;
        Ok(PerformanceWindow::assemble(
            start,
            end,
            horizon,
            aggregate,
            &records,
            loaded.settings.learning.top_k,
        ))
    });
    let window = match window {
        Ok(w) => w,
        Err(e) => return fail(e),
    };

    println!(
        "Last {} days ({:?} horizon): {} trades, {} pending",
        days, horizon, window.trade_count, window.pending
    );
    println!(
        "Wins {}  Losses {}  Win rate {:.1}%  Total P&L {:.2}",
        window.wins,
        window.losses,
        window.win_rate * 100.0,
        window.total_pnl
    );
    for (label, trades) in [("Best", &window.best), ("Worst", &window.worst)] {
        if trades.is_empty() {
            continue;
        }
        println!("{label}:");
        for t in trades {
            println!(
                "  #{:<5} {:<4} {:<8} x{:<6} {:>12.2}",
                t.id, t.side, t.ticker, t.quantity, t.pnl
            );
        }
    }
    ExitCode::SUCCESS
}

fn run_pending_pnl(config_path: &Path) -> ExitCode {
    let loaded = match load(config_path) {
        Ok(l) => l,
        Err(code) => return code,
    };
    let ledger = match open_ledger(&loaded.config, &loaded.settings) {
        Ok(l) => l,
        Err(e) => return fail(e),
    };
    let pending = match ledger.pending_pnl(Utc::now()) {
        Ok(p) => p,
        Err(e) => return fail(e),
    };

    let totals = LedgerAggregate::from_records(&pending, loaded.settings.learning.horizon);
    println!("{} trades awaiting P&L", totals.pending);
    for record in pending {
        println!(
            "  #{:<5} {}  {:<4} {:<8} x{:<6} @ {:.2}  short={} long={}",
            record.id,
            record.core.executed_at.format("%Y-%m-%d %H:%M"),
            record.core.side,
            record.core.ticker,
            record.core.quantity,
            record.core.price,
            record.pnl_short.map(|p| format!("{p:.2}")).unwrap_or_else(|| "-".into()),
            record.pnl_long.map(|p| format!("{p:.2}")).unwrap_or_else(|| "-".into()),
        );
    }
    ExitCode::SUCCESS
}

fn run_set_pnl(config_path: &Path, id: i64, pnl: RealizedPnl) -> ExitCode {
    if pnl.short.is_none() && pnl.long.is_none() {
        return fail(TradeloopError::Validation {
            reason: "give --short, --long, or both".into(),
        });
    }
    let loaded = match load(config_path) {
        Ok(l) => l,
        Err(code) => return code,
    };
    let ledger = match open_ledger(&loaded.config, &loaded.settings) {
        Ok(l) => l,
        Err(e) => return fail(e),
    };
    match ledger.record_realized_pnl(id, pnl) {
        Ok(()) => {
            println!("Updated trade #{id}");
            ExitCode::SUCCESS
        }
        Err(e) => fail(e),
    }
}

//! Tracing subscriber setup.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::domain::error::TradeloopError;

const DEFAULT_FILTER: &str = "tradeloop=info,warn";

/// Install the global subscriber: compact lines on stderr, plus a daily
/// rolling JSON file when `log_dir` is given.
///
/// The returned guard flushes the file writer on drop and must live as long
/// as the process.
pub fn init_tracing(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>, TradeloopError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact();

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "tradeloop.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .json();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| TradeloopError::Internal {
            reason: format!("tracing already initialised: {}", e),
        })?;

    Ok(guard)
}

//! Per-call timeouts and retry with backoff for collaborator calls.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use super::error::{FaultKind, TradeloopError};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `attempt + 1` (zero based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallPolicy {
    pub read_timeout: Duration,
    pub oracle_timeout: Duration,
    pub submit_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for CallPolicy {
    fn default() -> Self {
        CallPolicy {
            read_timeout: Duration::from_secs(10),
            oracle_timeout: Duration::from_secs(120),
            submit_timeout: Duration::from_secs(15),
            retry: RetryPolicy::default(),
        }
    }
}

/// Run `fut` under `limit`; an elapsed timer becomes `TradeloopError::Timeout`.
pub async fn bounded<T, F>(service: &str, limit: Duration, fut: F) -> Result<T, TradeloopError>
where
    F: Future<Output = Result<T, TradeloopError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(TradeloopError::Timeout {
            service: service.to_string(),
            millis: limit.as_millis() as u64,
        }),
    }
}

/// Bounded call retried with exponential backoff on external-service faults.
/// Only for idempotent reads.
pub async fn retry_read<T, F, Fut>(
    service: &str,
    limit: Duration,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, TradeloopError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TradeloopError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match bounded(service, limit, op()).await {
            Ok(value) => return Ok(value),
            Err(e) if e.kind() == FaultKind::ExternalService && attempt + 1 < attempts => {
                let base = policy.backoff(attempt);
                let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis() as u64 / 4);
                let delay = base + Duration::from_millis(jitter_ms);
                warn!(service, attempt = attempt + 1, error = %e, ?delay, "retrying read");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Run synchronous storage work on the blocking pool. A panic inside `op`
/// comes back as an internal error.
pub async fn blocking<T, F>(op: F) -> Result<T, TradeloopError>
where
    F: FnOnce() -> Result<T, TradeloopError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| TradeloopError::Internal {
            reason: format!("blocking task failed: {}", e),
        })?
}

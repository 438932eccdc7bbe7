//! Market data collaborator port.

use async_trait::async_trait;

use crate::domain::error::TradeloopError;
use crate::domain::market::{PortfolioSnapshot, Quote};

/// Read-only market and account access. Every method is idempotent and may be
/// retried by the caller.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn portfolio(&self) -> Result<PortfolioSnapshot, TradeloopError>;

    async fn quote(&self, ticker: &str) -> Result<Quote, TradeloopError>;

    /// Tickers ranked by a provider-defined criterion (e.g. `volume`, `gainers`).
    async fn rankings(&self, criteria: &str) -> Result<Vec<String>, TradeloopError>;
}

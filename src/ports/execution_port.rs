//! Order execution collaborator port.

use async_trait::async_trait;

use crate::domain::error::TradeloopError;
use crate::domain::market::{OrderAck, Side};

#[async_trait]
pub trait OrderExecutionProvider: Send + Sync {
    /// Maximum whole quantity purchasable at `price` given cash/margin.
    async fn buy_capacity(&self, ticker: &str, price: f64) -> Result<i64, TradeloopError>;

    /// Quantity currently held and sellable.
    async fn sell_capacity(&self, ticker: &str) -> Result<i64, TradeloopError>;

    /// Not idempotent. Callers must never retry this automatically.
    async fn submit_order(
        &self,
        ticker: &str,
        side: Side,
        quantity: i64,
        price: f64,
    ) -> Result<OrderAck, TradeloopError>;
}

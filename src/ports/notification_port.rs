//! Notification sink port. Delivery is best effort.

use async_trait::async_trait;

use crate::domain::error::TradeloopError;

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, report: &str) -> Result<(), TradeloopError>;
}

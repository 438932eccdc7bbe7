//! Notification sink that delivers reports to the log.

use async_trait::async_trait;
use tracing::info;

use crate::domain::error::TradeloopError;
use crate::ports::notification_port::NotificationSink;

#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn send(&self, report: &str) -> Result<(), TradeloopError> {
        for line in report.lines() {
            info!(target: "tradeloop::report", "{}", line);
        }
        Ok(())
    }
}

//! Report artifact port.

use crate::domain::error::TradeloopError;
use crate::domain::learning::LearningReport;

/// Port for writing report artifacts and fallback dumps.
pub trait ReportPort: Send + Sync {
    fn write_learning_report(&self, report: &LearningReport) -> Result<(), TradeloopError>;

    /// Durable last-resort dump of a payload that could not be persisted
    /// normally (pipeline state, rule-merge payloads). `label` identifies the
    /// run or cycle.
    fn write_fallback(
        &self,
        label: &str,
        payload: &serde_json::Value,
    ) -> Result<(), TradeloopError>;
}

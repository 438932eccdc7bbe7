//! Port traits: collaborator boundaries and storage contracts.

pub mod config_port;
pub mod market_data_port;
pub mod execution_port;
pub mod oracle_port;
pub mod notification_port;
pub mod ledger_port;
pub mod rule_artifact_port;
pub mod report_port;

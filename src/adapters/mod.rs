//! Concrete adapter implementations for ports.

#[cfg(feature = "postgres")]
pub mod postgres_adapter;
#[cfg(feature = "sqlite")]
pub mod sqlite_adapter;
pub mod file_config_adapter;
pub mod fs_rule_adapter;
pub mod json_report_adapter;
pub mod log_notifier;
pub mod paper_broker;
pub mod replay_oracle;

//! Core domain types and pipeline logic.

pub mod error;
pub mod market;
pub mod condition;
pub mod condition_parser;
pub mod rules;
pub mod ledger;
pub mod performance;
pub mod workflow;
pub mod call;
pub mod state;
pub mod rule_store;
pub mod operational;
pub mod learning;
pub mod scheduler;
pub mod config_validation;

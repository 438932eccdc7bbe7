//! tradeloop: a dual-cadence trading orchestration engine.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`], the operator command surface in
//! [`cli`].

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod cli;
pub mod logging;

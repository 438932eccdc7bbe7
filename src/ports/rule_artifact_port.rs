//! Rule artifact storage port.
//!
//! Storage for immutable rule-set versions, the active pointer, backups, and
//! the version history log. The ordering of the write protocol lives in
//! `domain::rule_store`; implementations need each call to be durable when it
//! returns, `set_active` to be atomic, and `lock_writer` to exclude every
//! other writer of the same store, including other processes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::TradeloopError;
use crate::domain::rules::RuleSetVersion;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: u64,
    pub previous: Option<u64>,
    pub at: DateTime<Utc>,
}

/// Exclusive hold on a store's write protocol. Released on drop.
pub struct WriteLease {
    _held: Option<Box<dyn Send>>,
}

impl WriteLease {
    pub fn new(held: impl Send + 'static) -> Self {
        WriteLease {
            _held: Some(Box::new(held)),
        }
    }

    /// Lease for a store no other process can reach.
    pub fn unguarded() -> Self {
        WriteLease { _held: None }
    }
}

pub trait RuleArtifactPort: Send + Sync {
    /// Block until this caller is the only writer of the store.
    fn lock_writer(&self) -> Result<WriteLease, TradeloopError>;

    fn active_id(&self) -> Result<Option<u64>, TradeloopError>;

    fn load_version(&self, id: u64) -> Result<Option<RuleSetVersion>, TradeloopError>;

    /// Every version id written so far, ascending. Includes versions that
    /// were written but never activated.
    fn version_ids(&self) -> Result<Vec<u64>, TradeloopError>;

    fn write_backup(
        &self,
        version: &RuleSetVersion,
        at: DateTime<Utc>,
    ) -> Result<(), TradeloopError>;

    /// Must refuse to overwrite an existing id.
    fn write_version(&self, version: &RuleSetVersion) -> Result<(), TradeloopError>;

    fn set_active(&self, id: u64) -> Result<(), TradeloopError>;

    fn append_history(&self, entry: &HistoryEntry) -> Result<(), TradeloopError>;

    fn history(&self) -> Result<Vec<HistoryEntry>, TradeloopError>;
}

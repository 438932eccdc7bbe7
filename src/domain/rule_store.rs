//! Versioned, copy-on-write store for the active rule set.
//!
//! Writes follow one protocol under the store's write lease: read the active
//! version, compute the new rules, back up the active version, write the new
//! version and swap the active pointer, then append the history link. The
//! lease spans processes, so a CLI rollback and a running scheduler never
//! interleave. Readers take an `Arc` snapshot and never wait on the writer;
//! [`RuleStore::refresh`] picks up versions activated elsewhere.

use std::sync::{Arc, RwLock};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{error, info};

use super::call::blocking;
use super::error::TradeloopError;
use super::rules::{Rule, RuleSetVersion, VersionOrigin};
use crate::ports::rule_artifact_port::{HistoryEntry, RuleArtifactPort};

pub struct RuleStore {
    artifacts: Arc<dyn RuleArtifactPort>,
    active: RwLock<Arc<RuleSetVersion>>,
    writer: Mutex<()>,
}

impl RuleStore {
    /// Load the active version, writing an empty genesis version if the
    /// store has never been activated.
    pub fn open(artifacts: Arc<dyn RuleArtifactPort>) -> Result<Self, TradeloopError> {
        let active = {
            let _lease = artifacts.lock_writer()?;
            match artifacts.active_id()? {
                Some(id) => load(artifacts.as_ref(), id)?,
                None => {
                    let mut genesis = RuleSetVersion::genesis();
                    genesis.id = next_id(artifacts.as_ref(), 0)?;
                    artifacts.write_version(&genesis)?;
                    artifacts.set_active(genesis.id)?;
                    artifacts.append_history(&HistoryEntry {
                        id: genesis.id,
                        previous: None,
                        at: genesis.created_at,
                    })?;
                    info!(version = genesis.id, "initialized rule store");
                    genesis
                }
            }
        };

        Ok(RuleStore {
            artifacts,
            active: RwLock::new(Arc::new(active)),
            writer: Mutex::new(()),
        })
    }

    /// Snapshot of the active version as this instance last saw it.
    pub fn active(&self) -> Arc<RuleSetVersion> {
        let guard = self.active.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Snapshot of the active version as stored now.
    pub async fn refresh(&self) -> Result<Arc<RuleSetVersion>, TradeloopError> {
        let seen = self.active().id;
        let artifacts = Arc::clone(&self.artifacts);
        let changed = blocking(move || match artifacts.active_id()? {
            Some(id) if id == seen => Ok(None),
            Some(id) => load(artifacts.as_ref(), id).map(Some),
            None => Err(no_active()),
        })
        .await?;

        let Some(version) = changed else {
            return Ok(self.active());
        };
        let mut guard = self.active.write().unwrap_or_else(|e| e.into_inner());
        // a local update may have landed while we were reading
        if guard.id == seen {
            info!(version = version.id, previous = seen, "picked up rule version");
            *guard = Arc::new(version);
        }
        Ok(Arc::clone(&guard))
    }

    pub fn version(&self, id: u64) -> Result<Option<RuleSetVersion>, TradeloopError> {
        self.artifacts.load_version(id)
    }

    pub fn versions(&self) -> Result<Vec<RuleSetVersion>, TradeloopError> {
        let mut out = Vec::new();
        for id in self.artifacts.version_ids()? {
            if let Some(v) = self.artifacts.load_version(id)? {
                out.push(v);
            }
        }
        Ok(out)
    }

    pub fn history(&self) -> Result<Vec<HistoryEntry>, TradeloopError> {
        self.artifacts.history()
    }

    /// Produce a new active version from the one currently stored.
    pub async fn update<F>(
        &self,
        origin: VersionOrigin,
        merge: F,
    ) -> Result<Arc<RuleSetVersion>, TradeloopError>
    where
        F: FnOnce(&RuleSetVersion) -> Vec<Rule> + Send + 'static,
    {
        let _guard = self.writer.lock().await;
        let artifacts = Arc::clone(&self.artifacts);
        let next = blocking(move || publish(artifacts.as_ref(), origin, merge)).await?;

        let next = Arc::new(next);
        *self.active.write().unwrap_or_else(|e| e.into_inner()) = Arc::clone(&next);
        Ok(next)
    }

    /// Activate a copy of version `target` as a brand-new version.
    pub async fn rollback(&self, target: u64) -> Result<Arc<RuleSetVersion>, TradeloopError> {
        let artifacts = Arc::clone(&self.artifacts);
        let source = blocking(move || load(artifacts.as_ref(), target)).await?;
        info!(target, "rolling back rule store");
        self.update(VersionOrigin::Rollback { from: target }, move |_| source.rules)
            .await
    }
}

fn no_active() -> TradeloopError {
    TradeloopError::RuleStore {
        reason: "no active version".to_string(),
    }
}

fn load(artifacts: &dyn RuleArtifactPort, id: u64) -> Result<RuleSetVersion, TradeloopError> {
    artifacts
        .load_version(id)?
        .ok_or(TradeloopError::VersionNotFound { id })
}

/// The write protocol. Runs on a blocking thread under the write lease.
fn publish<F>(
    artifacts: &dyn RuleArtifactPort,
    origin: VersionOrigin,
    merge: F,
) -> Result<RuleSetVersion, TradeloopError>
where
    F: FnOnce(&RuleSetVersion) -> Vec<Rule>,
{
    let _lease = artifacts.lock_writer()?;

    let current = match artifacts.active_id()? {
        Some(id) => load(artifacts, id)?,
        None => return Err(no_active()),
    };

    let rules = merge(&current);

    let now = Utc::now();
    artifacts.write_backup(&current, now)?;

    let next = RuleSetVersion {
        id: next_id(artifacts, current.id)?,
        rules,
        previous: Some(current.id),
        created_at: now,
        origin,
    };
    artifacts.write_version(&next)?;
    artifacts.set_active(next.id)?;

    let entry = HistoryEntry {
        id: next.id,
        previous: Some(current.id),
        at: now,
    };
    if let Err(e) = artifacts.append_history(&entry) {
        error!(version = next.id, error = %e, "history append failed, restoring previous pointer");
        if let Err(restore) = artifacts.set_active(current.id) {
            error!(version = current.id, error = %restore, "failed to restore active pointer");
        }
        return Err(e);
    }

    info!(
        version = next.id,
        previous = current.id,
        rules = next.rules.len(),
        "activated rule version"
    );
    Ok(next)
}

fn next_id(artifacts: &dyn RuleArtifactPort, floor: u64) -> Result<u64, TradeloopError> {
    let max = artifacts.version_ids()?.into_iter().max().unwrap_or(0);
    Ok(max.max(floor) + 1)
}

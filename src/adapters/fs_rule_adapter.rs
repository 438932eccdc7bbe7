//! Filesystem rule artifact adapter.
//!
//! Layout under the rules directory:
//!
//! ```text
//! versions/v000001.json        one immutable file per version
//! backups/v000001-<ts>.json    copy of the active version taken before a swap
//! ACTIVE                       id of the active version
//! history.jsonl                one link per activation, newest last
//! LOCK                         advisory lock held for a whole write
//! ```
//!
//! Files are written to a temporary sibling and moved into place. Versions
//! are linked rather than renamed so an existing id is never replaced.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs4::fs_std::FileExt;
use tracing::debug;

use crate::domain::error::TradeloopError;
use crate::domain::rules::RuleSetVersion;
use crate::ports::rule_artifact_port::{HistoryEntry, RuleArtifactPort, WriteLease};

pub struct FsRuleAdapter {
    root: PathBuf,
}

impl FsRuleAdapter {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, TradeloopError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("versions"))?;
        fs::create_dir_all(root.join("backups"))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn version_path(&self, id: u64) -> PathBuf {
        self.root.join("versions").join(format!("v{:06}.json", id))
    }

    fn active_path(&self) -> PathBuf {
        self.root.join("ACTIVE")
    }

    fn history_path(&self) -> PathBuf {
        self.root.join("history.jsonl")
    }

    fn lock_path(&self) -> PathBuf {
        self.root.join("LOCK")
    }
}

fn temp_sibling(path: &Path) -> Result<PathBuf, TradeloopError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| TradeloopError::RuleStore {
            reason: format!("invalid artifact path {}", path.display()),
        })?;
    Ok(path.with_file_name(format!(".{}.tmp", file_name)))
}

fn write_synced(path: &Path, contents: &[u8]) -> Result<(), TradeloopError> {
    let mut file = File::create(path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    Ok(())
}

/// Write `contents` to `path` via a synced temporary file and a rename.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), TradeloopError> {
    let tmp = temp_sibling(path)?;
    write_synced(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Like [`write_atomic`], but fails instead of replacing an existing `path`.
fn write_new(path: &Path, contents: &[u8]) -> Result<(), TradeloopError> {
    let tmp = temp_sibling(path)?;
    write_synced(&tmp, contents)?;
    let linked = fs::hard_link(&tmp, path);
    fs::remove_file(&tmp)?;
    match linked {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(TradeloopError::RuleStore {
            reason: format!("{} already exists", path.display()),
        }),
        Err(e) => Err(e.into()),
    }
}

fn parse_version_file(name: &str) -> Option<u64> {
    name.strip_prefix('v')?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

impl RuleArtifactPort for FsRuleAdapter {
    fn lock_writer(&self) -> Result<WriteLease, TradeloopError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path())?;
        FileExt::lock_exclusive(&file)?;
        debug!(root = %self.root.display(), "rule store write lock acquired");
        Ok(WriteLease::new(file))
    }

    fn active_id(&self) -> Result<Option<u64>, TradeloopError> {
        let path = self.active_path();
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        raw.trim()
            .parse()
            .map(Some)
            .map_err(|_| TradeloopError::RuleStore {
                reason: format!("ACTIVE pointer is not a version id: '{}'", raw.trim()),
            })
    }

    fn load_version(&self, id: u64) -> Result<Option<RuleSetVersion>, TradeloopError> {
        let path = self.version_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn version_ids(&self) -> Result<Vec<u64>, TradeloopError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.root.join("versions"))? {
            let entry = entry?;
            if let Some(id) = entry.file_name().to_str().and_then(parse_version_file) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    fn write_backup(
        &self,
        version: &RuleSetVersion,
        at: DateTime<Utc>,
    ) -> Result<(), TradeloopError> {
        let name = format!("v{:06}-{}.json", version.id, at.format("%Y%m%dT%H%M%S%6fZ"));
        let body = serde_json::to_vec_pretty(version)?;
        write_atomic(&self.root.join("backups").join(name), &body)
    }

    fn write_version(&self, version: &RuleSetVersion) -> Result<(), TradeloopError> {
        let body = serde_json::to_vec_pretty(version)?;
        write_new(&self.version_path(version.id), &body).map_err(|e| match e {
            TradeloopError::RuleStore { .. } => TradeloopError::RuleStore {
                reason: format!("version {} already exists", version.id),
            },
            other => other,
        })
    }

    fn set_active(&self, id: u64) -> Result<(), TradeloopError> {
        write_atomic(&self.active_path(), format!("{}\n", id).as_bytes())
    }

    fn append_history(&self, entry: &HistoryEntry) -> Result<(), TradeloopError> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.history_path())?;
        file.write_all(line.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    fn history(&self) -> Result<Vec<HistoryEntry>, TradeloopError> {
        let path = self.history_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&path)?;
        let mut entries = Vec::new();
        for line in raw.lines().filter(|l| !l.trim().is_empty()) {
            entries.push(serde_json::from_str(line)?);
        }
        Ok(entries)
    }
}

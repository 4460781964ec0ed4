//! Sync state: per-remote signal cursors.
//!
//! Persists a `SyncStateFile` JSON document at
//! `<workspace>/.agora/sync-state.json`, keyed by [`SyncRemote::key`].
//! Writes use the atomic `.tmp` + rename pattern.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use agora_core::SyncRemote;

use crate::error::{io_err, SyncError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSyncState {
    /// Newest signal timestamp already imported from this remote.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_cursor: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// On-disk sync state payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStateFile {
    #[serde(default)]
    pub remotes: BTreeMap<String, RemoteSyncState>,
}

impl SyncStateFile {
    pub fn cursor(&self, remote: &SyncRemote) -> Option<DateTime<Utc>> {
        self.remotes
            .get(&remote.key())
            .and_then(|s| s.last_sync_cursor)
    }

    /// Record a completed pass. The cursor never moves backwards.
    pub fn record_pass(
        &mut self,
        remote: &SyncRemote,
        cursor: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    ) {
        let entry = self.remotes.entry(remote.key()).or_default();
        entry.last_sync_cursor = match (entry.last_sync_cursor, cursor) {
            (Some(old), Some(new)) => Some(old.max(new)),
            (old, new) => old.or(new),
        };
        entry.last_synced_at = Some(at);
    }
}

/// `<root>/.agora/sync-state.json`
pub fn store_path_at(root: &Path) -> PathBuf {
    root.join(".agora").join("sync-state.json")
}

/// Load sync state. Returns an empty state if the file does not yet exist.
pub fn load_at(root: &Path) -> Result<SyncStateFile, SyncError> {
    let path = store_path_at(root);
    if !path.exists() {
        return Ok(SyncStateFile::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    Ok(serde_json::from_str(&contents)?)
}

/// Save sync state atomically: `<path>.tmp`, then rename.
pub fn save_at(root: &Path, state: &SyncStateFile) -> Result<(), SyncError> {
    let path = store_path_at(root);
    let Some(dir) = path.parent() else {
        return Err(io_err(
            path,
            std::io::Error::other("invalid sync state path"),
        ));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let json = serde_json::to_string_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, &path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(&path, e));
    }
    Ok(())
}

//! Snapshot file lifecycle: load at startup, periodic saves, shutdown flush.
//!
//! The snapshot file has exactly one owning process. Corrupt or unwritable
//! files are logged and worked around — telemetry must never take the service
//! down with it.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::snapshot::UsageSnapshot;
use crate::store::UsageStore;

/// Wall-clock period between background saves.
pub const SAVE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot io: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot decode: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Handle to the on-disk snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and decode the snapshot. `Ok(None)` when the file does not exist;
    /// `Err` when it exists but cannot be read or parsed.
    pub fn load(&self) -> Result<Option<UsageSnapshot>, SnapshotError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read(&self.path)?;
        let snap = serde_json::from_slice(&raw)?;
        Ok(Some(snap))
    }

    /// Serialize the snapshot and overwrite the file. The caller passes a
    /// consistent copy, never a live structure.
    pub fn save(&self, snap: &UsageSnapshot) -> Result<(), SnapshotError> {
        let raw = serde_json::to_vec_pretty(snap)?;
        fs::write(&self.path, raw)?;
        Ok(())
    }
}

/// Build the process's usage store from the snapshot file.
///
/// Ensures the parent directory exists (a failure there is logged and
/// ignored). A readable snapshot is adopted wholesale; a corrupt one is
/// abandoned in favor of defaults; an absent one initializes defaults and
/// writes them out immediately so a fresh deployment has a snapshot on disk
/// from the first moment.
pub fn open_store(file: &SnapshotFile) -> UsageStore {
    if let Some(dir) = file.path().parent() {
        if !dir.as_os_str().is_empty() {
            if let Err(e) = fs::create_dir_all(dir) {
                tracing::warn!(error = %e, dir = %dir.display(), "Failed to create snapshot directory");
            }
        }
    }

    match file.load() {
        Ok(Some(snap)) => {
            tracing::info!(
                path = %file.path().display(),
                total_requests = snap.total_requests,
                "Restored usage snapshot"
            );
            UsageStore::from_snapshot(snap)
        }
        Ok(None) => {
            let store = UsageStore::new();
            if let Err(e) = file.save(&store.snapshot()) {
                tracing::warn!(error = %e, path = %file.path().display(), "Failed to write initial snapshot");
            }
            store
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                path = %file.path().display(),
                "Snapshot unreadable, starting with fresh counters"
            );
            UsageStore::new()
        }
    }
}

/// Background save loop: one save per [`SAVE_INTERVAL`], independent of
/// request volume, plus a final flush when `shutdown` is cancelled. Save
/// failures are logged and implicitly retried on the next tick.
pub async fn run_periodic_save(store: UsageStore, file: SnapshotFile, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(SAVE_INTERVAL);
    // The first tick fires immediately; the startup path already saved.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = file.save(&store.snapshot()) {
                    tracing::warn!(error = %e, path = %file.path().display(), "Periodic snapshot save failed");
                }
            }
        }
    }

    match file.save(&store.snapshot()) {
        Ok(()) => tracing::info!(path = %file.path().display(), "Final usage snapshot written"),
        Err(e) => {
            tracing::warn!(error = %e, path = %file.path().display(), "Final snapshot save failed");
        }
    }
}

//! Compare the files recorded in the reconciliation cache with the disk.

use std::fmt;
use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use crate::core::reconcile::{DiskState, content_hash};
use crate::core::types::FileKind;
use crate::io::cache::CacheStore;
use crate::io::disk::snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncState {
    /// Disk matches what converge last wrote.
    InSync,
    /// Edited since the last apply.
    Modified,
    Missing,
    Unreadable,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SyncState::InSync => "in-sync",
            SyncState::Modified => "modified",
            SyncState::Missing => "missing",
            SyncState::Unreadable => "unreadable",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileStatus {
    pub path: String,
    pub kind: FileKind,
    pub state: SyncState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub files: Vec<FileStatus>,
    /// Set when the cache could not be used.
    pub warning: Option<String>,
}

impl StatusReport {
    pub fn in_sync(&self) -> bool {
        self.files.iter().all(|file| file.state == SyncState::InSync)
    }
}

/// Status of every cached path under `root`, in path order.
pub fn status(root: &Path, cache_path: &Path) -> Result<StatusReport> {
    let (cache, warning) = CacheStore::load(&root.join(cache_path))?;
    let disk = snapshot(root, cache.entries().keys().map(String::as_str));
    let files = cache
        .entries()
        .iter()
        .map(|(path, entry)| {
            let state = match disk.get(path) {
                Some(DiskState::Present(current)) if content_hash(current) == entry.hash => {
                    SyncState::InSync
                }
                Some(DiskState::Present(_)) => SyncState::Modified,
                Some(DiskState::Unreadable(_)) => SyncState::Unreadable,
                Some(DiskState::Missing) | None => SyncState::Missing,
            };
            FileStatus {
                path: path.clone(),
                kind: entry.kind,
                state,
            }
        })
        .collect();
    Ok(StatusReport { files, warning })
}

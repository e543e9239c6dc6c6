//! File reconciliation decisions.
//!
//! Pure: compares the cached last-applied hash, the on-disk snapshot and the
//! resolved desired content of every file, and decides what to do. Executing
//! the plan is [`crate::io::disk`]'s job.

use std::collections::BTreeMap;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::error::ApplyError;
use crate::core::resolve::{Desired, ResolvedFile, merge};
use crate::core::types::{FileKind, ManualReviewItem};

/// Last-applied state of one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub hash: String,
    pub kind: FileKind,
}

pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// On-disk state of one path, read before planning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskState {
    Missing,
    Present(String),
    Unreadable(String),
}

/// Compiled `ignore_file` patterns.
///
/// A pattern matches the path itself and everything below it.
#[derive(Debug, Clone)]
pub struct IgnoreSet {
    set: GlobSet,
}

impl IgnoreSet {
    pub fn new<'p>(patterns: impl IntoIterator<Item = &'p str>) -> Result<Self, ApplyError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let pattern = pattern.trim_end_matches('/');
            for candidate in [pattern.to_string(), format!("{pattern}/**")] {
                let glob = Glob::new(&candidate).map_err(|err| {
                    ApplyError::config(None, format!("invalid ignore pattern '{pattern}': {err}"))
                })?;
                builder.add(glob);
            }
        }
        let set = builder
            .build()
            .map_err(|err| ApplyError::config(None, format!("build ignore patterns: {err}")))?;
        Ok(Self { set })
    }

    pub fn empty() -> Self {
        Self {
            set: GlobSet::empty(),
        }
    }

    pub fn is_ignored(&self, path: &str) -> bool {
        self.set.is_match(path)
    }
}

/// What to do with one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The file is absent and is written fresh.
    Create(String),
    /// Engine output changed and nobody edited the file.
    Overwrite(String),
    /// A user-editable file merged with its on-disk content.
    Merge(String),
    /// A manual edit overwritten because the file is `always_overwrite`.
    Clobber(String),
    Unchanged,
    Skip,
    /// Left untouched until a human resolves it.
    Review(String),
    /// An undeclared generated file nobody edited since the last apply.
    Delete,
    /// An undeclared file that is already gone; only the cache entry goes.
    Forget,
    /// An undeclared file that was edited or is user-editable; left on disk.
    Orphaned,
    Failed {
        operation: &'static str,
        message: String,
    },
}

impl Decision {
    /// Content to write, for decisions that write.
    pub fn content(&self) -> Option<&str> {
        match self {
            Decision::Create(text)
            | Decision::Overwrite(text)
            | Decision::Merge(text)
            | Decision::Clobber(text) => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFile {
    pub path: String,
    pub kind: FileKind,
    /// Contributing features in scheduled order (empty for orphans).
    pub features: Vec<String>,
    pub decision: Decision,
    /// Cache change to record once the decision is carried out.
    pub cache: CacheUpdate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheUpdate {
    Keep,
    Set(CacheEntry),
    Remove,
}

/// Every decision of one apply, in path order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub files: Vec<PlannedFile>,
}

impl Plan {
    pub fn review_items(&self) -> Vec<ManualReviewItem> {
        self.files
            .iter()
            .filter_map(|file| match &file.decision {
                Decision::Review(reason) => Some(ManualReviewItem {
                    path: file.path.clone(),
                    features: file.features.clone(),
                    reason: reason.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    pub fn writes(&self) -> usize {
        self.files
            .iter()
            .filter(|file| file.decision.content().is_some() || file.decision == Decision::Delete)
            .count()
    }

    /// The file planned for `path`, if any.
    pub fn get(&self, path: &str) -> Option<&PlannedFile> {
        self.files.iter().find(|file| file.path == path)
    }

    /// Replace the content planned for `path` and decide again against the
    /// disk snapshot.
    ///
    /// Only files that are written or left unchanged can take new content.
    /// Returns `false` (and leaves the plan alone) for any other decision or
    /// an unplanned path.
    pub fn replace_content(
        &mut self,
        path: &str,
        content: String,
        disk: &DiskState,
        cached: Option<&CacheEntry>,
    ) -> bool {
        let Some(file) = self.files.iter_mut().find(|file| file.path == path) else {
            return false;
        };
        let decision = match (&file.decision, disk) {
            (
                Decision::Create(_)
                | Decision::Overwrite(_)
                | Decision::Merge(_)
                | Decision::Clobber(_)
                | Decision::Unchanged,
                DiskState::Present(current),
            ) if *current == content => Decision::Unchanged,
            (
                Decision::Create(_)
                | Decision::Overwrite(_)
                | Decision::Merge(_)
                | Decision::Clobber(_)
                | Decision::Unchanged,
                DiskState::Missing,
            ) => Decision::Create(content),
            (Decision::Clobber(_), DiskState::Present(_)) => Decision::Clobber(content),
            (Decision::Merge(_), DiskState::Present(_)) => Decision::Merge(content),
            (Decision::Unchanged, DiskState::Present(_)) if file.kind == FileKind::UserEditable => {
                Decision::Merge(content)
            }
            (
                Decision::Create(_) | Decision::Overwrite(_) | Decision::Unchanged,
                DiskState::Present(_),
            ) => Decision::Overwrite(content),
            _ => return false,
        };
        file.cache = cache_update(&decision, file.kind, disk, cached);
        file.decision = decision;
        true
    }
}

/// Decide every declared and every previously cached path.
pub fn plan(
    resolved: &[ResolvedFile<'_>],
    cache: &BTreeMap<String, CacheEntry>,
    disk: &BTreeMap<String, DiskState>,
    ignore: &IgnoreSet,
) -> Plan {
    let mut files = Vec::with_capacity(resolved.len());

    for file in resolved {
        let features = file.contributors.to_vec();
        if ignore.is_ignored(file.path) {
            files.push(PlannedFile {
                path: file.path.to_string(),
                kind: file.kind,
                features,
                decision: Decision::Skip,
                cache: CacheUpdate::Keep,
            });
            continue;
        }
        let on_disk = disk.get(file.path).unwrap_or(&DiskState::Missing);
        let cached = cache.get(file.path).map(|entry| entry.hash.as_str());
        let decision = match &file.desired {
            Desired::Text(desired) => decide_generated(
                desired,
                on_disk,
                cached,
                file.attributes.always_overwrite,
            ),
            Desired::Merge(spec) => match on_disk {
                DiskState::Unreadable(message) => Decision::Failed {
                    operation: "read",
                    message: message.clone(),
                },
                DiskState::Missing => match merge(spec, None, file.package) {
                    Ok(Some(content)) => Decision::Create(content),
                    Ok(None) => Decision::Skip,
                    Err(err) => Decision::Failed {
                        operation: "merge",
                        message: format!("{err:#}"),
                    },
                },
                DiskState::Present(current) => match merge(spec, Some(current), file.package) {
                    Ok(Some(merged)) if merged == *current => Decision::Unchanged,
                    Ok(Some(merged)) => Decision::Merge(merged),
                    Ok(None) => Decision::Unchanged,
                    Err(err) => Decision::Review(format!(
                        "cannot merge the edited file: {err:#}"
                    )),
                },
            },
        };
        let update = cache_update(&decision, file.kind, on_disk, cache.get(file.path));
        files.push(PlannedFile {
            path: file.path.to_string(),
            kind: file.kind,
            features,
            decision,
            cache: update,
        });
    }

    for (path, entry) in cache {
        if resolved.iter().any(|file| file.path == path.as_str()) || ignore.is_ignored(path) {
            continue;
        }
        let on_disk = disk.get(path).unwrap_or(&DiskState::Missing);
        let decision = decide_orphan(entry, on_disk);
        let update = match decision {
            Decision::Failed { .. } => CacheUpdate::Keep,
            _ => CacheUpdate::Remove,
        };
        files.push(PlannedFile {
            path: path.clone(),
            kind: entry.kind,
            features: Vec::new(),
            decision,
            cache: update,
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Plan { files }
}

/// Decision-table row for a generated file.
pub fn decide_generated(
    desired: &str,
    disk: &DiskState,
    cached: Option<&str>,
    always_overwrite: bool,
) -> Decision {
    let current = match disk {
        DiskState::Missing => return Decision::Create(desired.to_string()),
        DiskState::Unreadable(message) => {
            return Decision::Failed {
                operation: "read",
                message: message.clone(),
            };
        }
        DiskState::Present(current) => current,
    };
    if current == desired {
        return Decision::Unchanged;
    }
    let disk_hash = content_hash(current);
    if cached == Some(disk_hash.as_str()) {
        return Decision::Overwrite(desired.to_string());
    }
    if always_overwrite {
        return Decision::Clobber(desired.to_string());
    }
    let reason = match cached {
        Some(_) => "edited since the last apply",
        None => "exists but was never written by converge",
    };
    Decision::Review(reason.to_string())
}

/// Decision-table row for a cached path no feature declares anymore.
///
/// Deletion is permitted by the cached kind alone: only a generated file
/// whose content still matches the last-applied hash is deleted. A
/// user-editable file is never deleted, and an edited generated file is left
/// for a human. Per-file attributes are not cached and play no part here.
fn decide_orphan(entry: &CacheEntry, disk: &DiskState) -> Decision {
    match disk {
        DiskState::Missing => Decision::Forget,
        DiskState::Unreadable(message) => Decision::Failed {
            operation: "read",
            message: message.clone(),
        },
        DiskState::Present(current) => {
            if entry.kind == FileKind::Generated && content_hash(current) == entry.hash {
                Decision::Delete
            } else {
                Decision::Orphaned
            }
        }
    }
}

fn cache_update(
    decision: &Decision,
    kind: FileKind,
    disk: &DiskState,
    cached: Option<&CacheEntry>,
) -> CacheUpdate {
    let hash = match (decision.content(), disk) {
        (Some(content), _) => Some(content_hash(content)),
        (None, DiskState::Present(current)) if *decision == Decision::Unchanged => {
            Some(content_hash(current))
        }
        _ => None,
    };
    match hash {
        Some(hash) => {
            let entry = CacheEntry { hash, kind };
            if cached == Some(&entry) {
                CacheUpdate::Keep
            } else {
                CacheUpdate::Set(entry)
            }
        }
        None => CacheUpdate::Keep,
    }
}

//! Filesystem side of reconciliation: snapshot before planning, then carry
//! out the plan.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::core::reconcile::{Decision, DiskState, Plan, PlannedFile};
use crate::core::types::{FileFailure, ManualReviewItem, Summary};
use crate::io::cache::CacheStore;
use crate::io::config::write_atomic;

/// Read the current content of every project-relative path in `paths`.
pub fn snapshot<'p>(root: &Path, paths: impl IntoIterator<Item = &'p str>) -> BTreeMap<String, DiskState> {
    paths
        .into_iter()
        .map(|path| (path.to_string(), read_state(&root.join(path))))
        .collect()
}

fn read_state(path: &Path) -> DiskState {
    match fs::read_to_string(path) {
        Ok(contents) => DiskState::Present(contents),
        Err(err) if err.kind() == ErrorKind::NotFound => DiskState::Missing,
        Err(err) => DiskState::Unreadable(format!("read {}: {err}", path.display())),
    }
}

/// Carry out `plan` under `root`, folding outcomes into `summary`.
///
/// Files are handled one at a time in path order. A failure is recorded and
/// the remaining files are still attempted. The cache is flushed right after
/// every write or delete, and once more at the end for entries that only
/// needed a refresh.
pub fn execute(root: &Path, plan: &Plan, cache: &mut CacheStore, summary: &mut Summary) {
    for file in &plan.files {
        match &file.decision {
            Decision::Create(content)
            | Decision::Overwrite(content)
            | Decision::Merge(content)
            | Decision::Clobber(content) => {
                let target = root.join(&file.path);
                match write_file(&target, content) {
                    Ok(()) => {
                        debug!(path = %file.path, "file written");
                        if matches!(file.decision, Decision::Create(_)) {
                            summary.created += 1;
                        } else {
                            summary.updated += 1;
                        }
                        if matches!(file.decision, Decision::Clobber(_)) {
                            let message = format!(
                                "overwrote manual edit of '{}' (always_overwrite)",
                                file.path
                            );
                            warn!("{message}");
                            summary.warnings.push(message);
                        }
                        record_and_flush(file, cache, summary);
                    }
                    Err(err) => fail(summary, file, "write", &err),
                }
            }
            Decision::Delete => match remove_file(&root.join(&file.path)) {
                Ok(()) => {
                    debug!(path = %file.path, "file deleted");
                    summary.deleted += 1;
                    record_and_flush(file, cache, summary);
                }
                Err(err) => fail(summary, file, "delete", &err),
            },
            Decision::Unchanged => {
                summary.unchanged += 1;
                cache.record(&file.path, &file.cache);
            }
            Decision::Skip => summary.skipped += 1,
            Decision::Review(reason) => {
                warn!(path = %file.path, reason = %reason, "manual edit needs review");
                summary.needs_review += 1;
                summary.manual_review_items.push(ManualReviewItem {
                    path: file.path.clone(),
                    features: file.features.clone(),
                    reason: reason.clone(),
                });
            }
            Decision::Forget => {
                cache.record(&file.path, &file.cache);
            }
            Decision::Orphaned => {
                let message = format!(
                    "'{}' is no longer declared by any feature and was left in place",
                    file.path
                );
                warn!("{message}");
                summary.warnings.push(message);
                summary.orphaned.push(file.path.clone());
                cache.record(&file.path, &file.cache);
            }
            Decision::Failed { operation, message } => {
                warn!(path = %file.path, operation, message = %message, "file operation failed");
                summary.failures.push(FileFailure {
                    path: file.path.clone(),
                    features: file.features.clone(),
                    operation: (*operation).to_string(),
                    message: message.clone(),
                });
                summary.failed = true;
            }
        }
    }

    if let Err(err) = cache.flush() {
        cache_failure(summary, cache, &err);
    }
    info!(
        created = summary.created,
        updated = summary.updated,
        unchanged = summary.unchanged,
        deleted = summary.deleted,
        needs_review = summary.needs_review,
        "files reconciled"
    );
}

fn write_file(target: &Path, content: &str) -> Result<()> {
    if target.is_dir() {
        bail!("{} is a directory", target.display());
    }
    write_atomic(target, content)
}

fn remove_file(target: &Path) -> Result<()> {
    match fs::remove_file(target) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove {}", target.display())),
    }
}

fn record_and_flush(file: &PlannedFile, cache: &mut CacheStore, summary: &mut Summary) {
    cache.record(&file.path, &file.cache);
    if let Err(err) = cache.flush() {
        cache_failure(summary, cache, &err);
    }
}

fn fail(summary: &mut Summary, file: &PlannedFile, operation: &str, err: &anyhow::Error) {
    warn!(path = %file.path, operation, err = %err, "file operation failed");
    summary.failures.push(FileFailure {
        path: file.path.clone(),
        features: file.features.clone(),
        operation: operation.to_string(),
        message: format!("{err:#}"),
    });
    summary.failed = true;
}

fn cache_failure(summary: &mut Summary, cache: &CacheStore, err: &anyhow::Error) {
    warn!(err = %err, "cache flush failed");
    summary.failures.push(FileFailure {
        path: cache.path().display().to_string(),
        features: Vec::new(),
        operation: "write cache".to_string(),
        message: format!("{err:#}"),
    });
    summary.failed = true;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::reconcile::{CacheEntry, CacheUpdate, content_hash};
    use crate::core::types::FileKind;

    fn planned(path: &str, decision: Decision) -> PlannedFile {
        let cache = match decision.content() {
            Some(content) => CacheUpdate::Set(CacheEntry {
                hash: content_hash(content),
                kind: FileKind::Generated,
            }),
            None if decision == Decision::Delete => CacheUpdate::Remove,
            None => CacheUpdate::Keep,
        };
        PlannedFile {
            path: path.to_string(),
            kind: FileKind::Generated,
            features: vec!["feat".to_string()],
            decision,
            cache,
        }
    }

    #[test]
    fn snapshot_distinguishes_missing_and_present() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("a.txt"), "a").expect("write");
        fs::create_dir(temp.path().join("dir")).expect("mkdir");
        let states = snapshot(temp.path(), ["a.txt", "b.txt", "dir"]);
        assert_eq!(states["a.txt"], DiskState::Present("a".to_string()));
        assert_eq!(states["b.txt"], DiskState::Missing);
        assert!(matches!(states["dir"], DiskState::Unreadable(_)));
    }

    #[test]
    fn writes_deletes_and_tracks_cache() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::write(root.join("old.txt"), "old").expect("write");
        let (mut cache, _) = CacheStore::load(&root.join(".converge/cache.json")).expect("cache");
        cache.record(
            "old.txt",
            &CacheUpdate::Set(CacheEntry {
                hash: content_hash("old"),
                kind: FileKind::Generated,
            }),
        );
        let plan = Plan {
            files: vec![
                planned("nested/new.txt", Decision::Create("new\n".to_string())),
                planned("old.txt", Decision::Delete),
            ],
        };
        let mut summary = Summary::default();
        execute(root, &plan, &mut cache, &mut summary);

        assert_eq!(fs::read_to_string(root.join("nested/new.txt")).expect("read"), "new\n");
        assert!(!root.join("old.txt").exists());
        assert_eq!((summary.created, summary.deleted), (1, 1));
        assert!(!summary.failed);
        let (reloaded, _) = CacheStore::load(&root.join(".converge/cache.json")).expect("reload");
        assert!(reloaded.entries().contains_key("nested/new.txt"));
        assert!(!reloaded.entries().contains_key("old.txt"));
    }

    #[test]
    fn one_failure_does_not_stop_siblings() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::create_dir(root.join("blocked")).expect("mkdir");
        let (mut cache, _) = CacheStore::load(&root.join(".converge/cache.json")).expect("cache");
        let plan = Plan {
            files: vec![
                planned("blocked", Decision::Create("x".to_string())),
                planned("ok.txt", Decision::Create("y".to_string())),
            ],
        };
        let mut summary = Summary::default();
        execute(root, &plan, &mut cache, &mut summary);
        assert!(summary.failed);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].path, "blocked");
        assert_eq!(summary.failures[0].features, vec!["feat"]);
        assert_eq!(summary.created, 1);
        assert!(root.join("ok.txt").exists());
    }

    #[test]
    fn review_and_orphans_are_reported_without_writes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        let (mut cache, _) = CacheStore::load(&root.join(".converge/cache.json")).expect("cache");
        let plan = Plan {
            files: vec![
                planned("edited.txt", Decision::Review("edited".to_string())),
                PlannedFile {
                    cache: CacheUpdate::Remove,
                    ..planned("stale.txt", Decision::Orphaned)
                },
            ],
        };
        let mut summary = Summary::default();
        execute(root, &plan, &mut cache, &mut summary);
        assert_eq!(summary.needs_review, 1);
        assert_eq!(summary.manual_review_items[0].path, "edited.txt");
        assert_eq!(summary.orphaned, vec!["stale.txt"]);
        assert_eq!(summary.writes(), 0);
        assert!(!root.join(".converge/cache.json").exists());
    }
}

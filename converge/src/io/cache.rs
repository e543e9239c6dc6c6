//! Reconciliation cache: last-applied hash and kind per project path.
//!
//! Stored as `{ "version": 1, "files": { path: { hash, kind } } }` and
//! validated against `schemas/cache.schema.json`. Anything unreadable as the
//! current version is treated as an empty cache.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::reconcile::{CacheEntry, CacheUpdate};
use crate::io::config::write_atomic;

pub const CACHE_VERSION: u64 = 1;

const CACHE_SCHEMA: &str = include_str!("../../schemas/cache.schema.json");

#[derive(Debug, Serialize, Deserialize)]
struct CacheDocument {
    version: u64,
    files: BTreeMap<String, CacheEntry>,
}

#[derive(Debug)]
pub struct CacheStore {
    path: PathBuf,
    entries: BTreeMap<String, CacheEntry>,
    dirty: bool,
}

impl CacheStore {
    /// Load the cache at `path`.
    ///
    /// Returns the store and a warning when an existing document had to be
    /// discarded. Only a failed read is an error.
    pub fn load(path: &Path) -> Result<(Self, Option<String>)> {
        let empty = Self {
            path: path.to_path_buf(),
            entries: BTreeMap::new(),
            dirty: false,
        };
        if !path.exists() {
            debug!(path = %path.display(), "no cache yet");
            return Ok((empty, None));
        }
        let contents =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        match parse_document(&contents) {
            Ok(entries) => {
                debug!(path = %path.display(), entries = entries.len(), "cache loaded");
                Ok((Self { entries, ..empty }, None))
            }
            Err(err) => {
                warn!(path = %path.display(), err = %err, "discarding cache");
                let message = format!("discarded cache {}: {err:#}", path.display());
                Ok((empty, Some(message)))
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &BTreeMap<String, CacheEntry> {
        &self.entries
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Record one planned cache change in memory. Returns whether it changed
    /// anything.
    pub fn record(&mut self, path: &str, update: &CacheUpdate) -> bool {
        let changed = match update {
            CacheUpdate::Keep => false,
            CacheUpdate::Set(entry) if self.entries.get(path) == Some(entry) => false,
            CacheUpdate::Set(entry) => {
                self.entries.insert(path.to_string(), entry.clone());
                true
            }
            CacheUpdate::Remove => self.entries.remove(path).is_some(),
        };
        self.dirty |= changed;
        changed
    }

    /// Atomically persist the cache if it changed since the last flush.
    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let doc = CacheDocument {
            version: CACHE_VERSION,
            files: self.entries.clone(),
        };
        let mut buf = serde_json::to_string_pretty(&doc).context("serialize cache")?;
        buf.push('\n');
        write_atomic(&self.path, &buf)?;
        debug!(path = %self.path.display(), entries = self.entries.len(), "cache flushed");
        self.dirty = false;
        Ok(())
    }
}

fn parse_document(contents: &str) -> Result<BTreeMap<String, CacheEntry>> {
    let value: Value = serde_json::from_str(contents).context("parse cache json")?;
    let version = value.get("version").and_then(Value::as_u64);
    if version != Some(CACHE_VERSION) {
        return Err(anyhow!(
            "unsupported cache version {}, expected {CACHE_VERSION}",
            version.map_or_else(|| "missing".to_string(), |v| v.to_string())
        ));
    }
    validate_schema(&value)?;
    let doc: CacheDocument = serde_json::from_value(value).context("deserialize cache")?;
    Ok(doc.files)
}

fn validate_schema(instance: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(CACHE_SCHEMA).context("parse cache schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {err}"))?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(anyhow!(
            "cache schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::reconcile::content_hash;
    use crate::core::types::FileKind;

    fn entry(text: &str) -> CacheEntry {
        CacheEntry {
            hash: content_hash(text),
            kind: FileKind::Generated,
        }
    }

    #[test]
    fn missing_cache_is_empty_without_warning() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (store, warning) = CacheStore::load(&temp.path().join("cache.json")).expect("load");
        assert!(store.entries().is_empty());
        assert!(warning.is_none());
    }

    #[test]
    fn record_flush_and_reload() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".converge").join("cache.json");
        let (mut store, _) = CacheStore::load(&path).expect("load");
        assert!(store.record("a.txt", &CacheUpdate::Set(entry("a"))));
        assert!(!store.record("a.txt", &CacheUpdate::Set(entry("a"))));
        store.flush().expect("flush");
        assert!(!store.is_dirty());

        let (reloaded, warning) = CacheStore::load(&path).expect("reload");
        assert!(warning.is_none());
        assert_eq!(reloaded.entries()["a.txt"], entry("a"));

        let raw = fs::read_to_string(&path).expect("read");
        assert!(raw.contains("\"version\": 1"));
        assert!(raw.contains("\"kind\": \"generated\""));
    }

    #[test]
    fn flush_without_changes_does_not_touch_disk() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("cache.json");
        let (mut store, _) = CacheStore::load(&path).expect("load");
        assert!(!store.record("gone.txt", &CacheUpdate::Remove));
        store.flush().expect("flush");
        assert!(!path.exists());
    }

    #[test]
    fn version_mismatch_is_treated_as_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("cache.json");
        fs::write(&path, r#"{ "version": 2, "files": {} }"#).expect("write");
        let (store, warning) = CacheStore::load(&path).expect("load");
        assert!(store.entries().is_empty());
        assert!(warning.expect("warning").contains("unsupported cache version 2"));
    }

    #[test]
    fn schema_violation_is_treated_as_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("cache.json");
        fs::write(
            &path,
            r#"{ "version": 1, "files": { "a.txt": { "hash": "nothex", "kind": "generated" } } }"#,
        )
        .expect("write");
        let (store, warning) = CacheStore::load(&path).expect("load");
        assert!(store.entries().is_empty());
        assert!(warning.expect("warning").contains("schema validation failed"));
    }

    #[test]
    fn garbage_is_treated_as_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("cache.json");
        fs::write(&path, "not json").expect("write");
        let (store, warning) = CacheStore::load(&path).expect("load");
        assert!(store.entries().is_empty());
        assert!(warning.is_some());
    }
}

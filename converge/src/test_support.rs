//! Test-only helpers: in-memory projects, temp project directories and
//! deterministic registries.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use serde_json::{Value, json};
use tempfile::TempDir;

use crate::core::dependency::PackageRegistry;
use crate::core::types::{PackageEntry, Project};

/// In-memory project with a root package named `root` and one sub-package
/// per relative path, named after its last path segment.
pub fn project_with_packages(rel_paths: &[&str]) -> Project {
    let base = PathBuf::from("/project");
    let packages = rel_paths
        .iter()
        .map(|rel| {
            let name = rel.rsplit('/').next().unwrap_or(rel).to_string();
            PackageEntry {
                manifest: json!({ "name": name }),
                name,
                abs_path: base.join(rel),
                rel_path: (*rel).to_string(),
            }
        })
        .collect();
    Project {
        root: PackageEntry {
            name: "root".to_string(),
            abs_path: base,
            rel_path: String::new(),
            manifest: json!({ "name": "root" }),
        },
        packages,
    }
}

/// Registry answering from a fixed table and counting lookups.
#[derive(Debug, Default)]
pub struct StaticRegistry {
    versions: BTreeMap<String, String>,
    lookups: Cell<usize>,
}

impl StaticRegistry {
    pub fn new(entries: impl IntoIterator<Item = (&'static str, &'static str)>) -> Self {
        Self {
            versions: entries
                .into_iter()
                .map(|(name, version)| (name.to_string(), version.to_string()))
                .collect(),
            lookups: Cell::new(0),
        }
    }

    pub fn lookups(&self) -> usize {
        self.lookups.get()
    }
}

impl PackageRegistry for StaticRegistry {
    fn resolve_version(&self, name: &str, tag: &str) -> Result<String> {
        self.lookups.set(self.lookups.get() + 1);
        self.versions
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("no version of {name}@{tag}"))
    }
}

/// Registry that fails every lookup.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingRegistry;

impl PackageRegistry for FailingRegistry {
    fn resolve_version(&self, name: &str, tag: &str) -> Result<String> {
        Err(anyhow!("registry unavailable for {name}@{tag}"))
    }
}

/// A project directory in a temp dir, removed on drop.
pub struct TestProject {
    dir: TempDir,
}

impl TestProject {
    /// Temp project whose root `package.json` is `manifest`.
    pub fn new(manifest: Value) -> Self {
        let project = Self::empty();
        project.write_manifest("", &manifest);
        project
    }

    /// Temp project without any manifest.
    pub fn empty() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.path(rel).exists()
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.path(rel)).unwrap_or_else(|err| panic!("read {rel}: {err}"))
    }

    pub fn write(&self, rel: &str, contents: &str) {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, contents).unwrap_or_else(|err| panic!("write {rel}: {err}"));
    }

    /// Write `package.json` into the package directory `rel_dir` (`""` for root).
    pub fn write_manifest(&self, rel_dir: &str, manifest: &Value) {
        let rel = if rel_dir.is_empty() {
            "package.json".to_string()
        } else {
            format!("{rel_dir}/package.json")
        };
        let mut buf = serde_json::to_string_pretty(manifest).expect("serialize manifest");
        buf.push('\n');
        self.write(&rel, &buf);
    }

    /// Parsed root `package.json`.
    pub fn manifest(&self) -> Value {
        serde_json::from_str(&self.read("package.json")).expect("parse manifest")
    }

    /// Paths of every file under the project, relative and sorted.
    pub fn files(&self) -> Vec<String> {
        let mut files: Vec<String> = walkdir::WalkDir::new(self.root())
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                entry
                    .path()
                    .strip_prefix(self.root())
                    .ok()
                    .map(|rel| rel.to_string_lossy().replace('\\', "/"))
            })
            .collect();
        files.sort();
        files
    }
}

//! Shared deterministic types for the convergence core.
//!
//! These types define stable contracts between core components and the
//! reporting layer. They must not depend on external state or I/O.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::Location;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ownership class of a declared file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileKind {
    /// Fully engine-owned; rewritten unless a manual edit is detected.
    Generated,
    /// Seeded and merged by the engine; humans may edit untouched fields.
    UserEditable,
    /// A glob excluded from generated-file bookkeeping.
    Ignored,
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FileKind::Generated => "generated",
            FileKind::UserEditable => "user-editable",
            FileKind::Ignored => "ignored",
        };
        f.write_str(label)
    }
}

/// Per-file attributes consumed by aggregating features and the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttributes {
    /// The file is not committed and belongs in `.gitignore`.
    pub gitignore: bool,
    /// The file is not published and belongs in `.npmignore`.
    pub npmignore: bool,
    /// Overwrite even when a manual edit is detected.
    pub always_overwrite: bool,
}

impl FileAttributes {
    /// Defaults for a file of `kind`. Generated and ignored paths are treated
    /// as build artifacts; user-editable files are committed.
    pub fn default_for(kind: FileKind) -> Self {
        match kind {
            FileKind::Generated | FileKind::Ignored => Self {
                gitignore: true,
                npmignore: true,
                always_overwrite: false,
            },
            FileKind::UserEditable => Self {
                gitignore: false,
                npmignore: false,
                always_overwrite: false,
            },
        }
    }

    /// Attributes for a generated file that is meant to be committed.
    pub fn committed() -> Self {
        Self {
            gitignore: false,
            npmignore: false,
            always_overwrite: false,
        }
    }
}

/// Source location of the builder call that declared an effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite(&'static Location<'static>);

impl CallSite {
    #[track_caller]
    pub fn here() -> Self {
        Self(Location::caller())
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.0.file(),
            self.0.line(),
            self.0.column()
        )
    }
}

impl Serialize for CallSite {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A package of the project: the workspace root or one of its sub-packages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackageEntry {
    pub name: String,
    pub abs_path: PathBuf,
    /// Path relative to the project root (`""` for the root package).
    pub rel_path: String,
    pub manifest: Value,
}

impl PackageEntry {
    /// Join a package-relative path onto this package's project-relative path.
    pub fn project_path(&self, path: &str) -> String {
        let trimmed = path.trim_start_matches("./");
        if self.rel_path.is_empty() {
            trimmed.to_string()
        } else {
            format!("{}/{}", self.rel_path, trimmed)
        }
    }

    pub fn is_root(&self) -> bool {
        self.rel_path.is_empty()
    }
}

/// Read-only project topology consumed by recipes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Project {
    pub root: PackageEntry,
    pub packages: Vec<PackageEntry>,
}

impl Project {
    /// Find a package by name, including the root package.
    pub fn package(&self, name: &str) -> Option<&PackageEntry> {
        if self.root.name == name {
            return Some(&self.root);
        }
        self.packages.iter().find(|pkg| pkg.name == name)
    }

    /// Root first, then sub-packages in discovery order.
    pub fn all_packages(&self) -> impl Iterator<Item = &PackageEntry> {
        std::iter::once(&self.root).chain(self.packages.iter())
    }
}

/// Per-feature options from `converge.toml`, exposed to peer-context
/// modifiers and recipes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureOptions {
    by_feature: BTreeMap<String, Value>,
}

impl FeatureOptions {
    pub fn new(by_feature: BTreeMap<String, Value>) -> Self {
        Self { by_feature }
    }

    /// Deserialize the options of `feature`, or `T::default()` when absent.
    pub fn get<T: DeserializeOwned + Default>(&self, feature: &str) -> anyhow::Result<T> {
        match self.by_feature.get(feature) {
            None => Ok(T::default()),
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|err| anyhow::anyhow!("invalid options for feature '{feature}': {err}")),
        }
    }
}

/// Kind of a task a feature defines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Test,
    Build,
    Format,
    Lint,
    Publish,
    Start,
    Other(String),
}

/// A task registered by a feature recipe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskEntry {
    pub name: String,
    pub kind: TaskKind,
    pub definition: Value,
    pub package: String,
    pub feature: String,
}

/// A conflict between a human edit and the engine's desired content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManualReviewItem {
    pub path: String,
    /// Features that contributed to the file, in scheduled order.
    pub features: Vec<String>,
    pub reason: String,
}

/// A file operation that failed with an I/O error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub path: String,
    pub features: Vec<String>,
    pub operation: String,
    pub message: String,
}

/// Outcome counts and findings of one apply run.
///
/// This is the only data the engine promises to reporting layers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub needs_review: usize,
    pub dependencies_added: usize,
    pub dependencies_changed: usize,
    pub dependencies_removed: usize,
    pub duration_ms: u128,
    pub warnings: Vec<String>,
    pub manual_review_items: Vec<ManualReviewItem>,
    pub orphaned: Vec<String>,
    pub failures: Vec<FileFailure>,
    pub failed: bool,
}

impl Summary {
    /// Number of project files written or deleted.
    pub fn writes(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn package(rel_path: &str) -> PackageEntry {
        PackageEntry {
            name: "pkg".to_string(),
            abs_path: PathBuf::from("/tmp/project").join(rel_path),
            rel_path: rel_path.to_string(),
            manifest: json!({}),
        }
    }

    #[test]
    fn project_path_joins_package_prefix() {
        assert_eq!(package("").project_path("./tsconfig.json"), "tsconfig.json");
        assert_eq!(
            package("packages/a").project_path("tsconfig.json"),
            "packages/a/tsconfig.json"
        );
    }

    #[test]
    fn feature_options_default_when_absent() {
        #[derive(Debug, Default, serde::Deserialize, PartialEq)]
        struct Opts {
            indent: Option<u32>,
        }
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), json!({ "indent": 4 }));
        let options = FeatureOptions::new(map);
        assert_eq!(options.get::<Opts>("a").expect("a").indent, Some(4));
        assert_eq!(options.get::<Opts>("b").expect("b"), Opts::default());
    }

    #[test]
    fn call_site_displays_location() {
        let site = CallSite::here();
        assert!(site.to_string().contains("types.rs"));
    }
}

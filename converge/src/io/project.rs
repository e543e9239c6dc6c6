//! Project discovery: the root manifest and its workspace packages.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde_json::{Value, json};
use tracing::{debug, instrument};
use walkdir::{DirEntry, WalkDir};

use crate::core::types::{PackageEntry, Project};

pub const MANIFEST_FILE: &str = "package.json";

/// Load the project rooted at `root`.
///
/// A missing root manifest yields a synthetic root package named after the
/// directory. Sub-packages come from the root manifest's `workspaces` globs
/// (an array, or `{ "packages": [...] }`), sorted by relative path.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn load_project(root: &Path) -> Result<Project> {
    let root_manifest = read_manifest(&root.join(MANIFEST_FILE))?;
    let root_package = PackageEntry {
        name: package_name(&root_manifest, root),
        abs_path: root.to_path_buf(),
        rel_path: String::new(),
        manifest: root_manifest.unwrap_or_else(|| json!({})),
    };

    let (include, exclude) = workspace_globs(&root_package.manifest)?;
    let mut packages = Vec::new();
    if !include.is_empty() {
        for dir in package_dirs(root)? {
            let rel_path = relative(root, &dir);
            if !include.is_match(&rel_path) || exclude.is_match(&rel_path) {
                continue;
            }
            let manifest = read_manifest(&dir.join(MANIFEST_FILE))?.unwrap_or_else(|| json!({}));
            packages.push(PackageEntry {
                name: package_name(&Some(manifest.clone()), &dir),
                abs_path: dir,
                rel_path,
                manifest,
            });
        }
    }
    packages.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));

    let mut names = HashSet::from([root_package.name.clone()]);
    for package in &packages {
        if !names.insert(package.name.clone()) {
            return Err(anyhow!(
                "package name '{}' at {} is not unique",
                package.name,
                package.rel_path
            ));
        }
    }

    debug!(packages = packages.len(), "project loaded");
    Ok(Project {
        root: root_package,
        packages,
    })
}

fn read_manifest(path: &Path) -> Result<Option<Value>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let value: Value =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    if !value.is_object() {
        return Err(anyhow!("{} must contain a JSON object", path.display()));
    }
    Ok(Some(value))
}

fn package_name(manifest: &Option<Value>, dir: &Path) -> String {
    manifest
        .as_ref()
        .and_then(|m| m.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| {
            dir.file_name()
                .map(|name| name.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "root".to_string())
}

/// Include and exclude (`!`-prefixed) sets from the `workspaces` field.
fn workspace_globs(manifest: &Value) -> Result<(GlobSet, GlobSet)> {
    let patterns = match manifest.get("workspaces") {
        None => Vec::new(),
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        Some(Value::Object(map)) => map
            .get("packages")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default(),
        Some(other) => return Err(anyhow!("unsupported workspaces value {other}")),
    };

    let mut include = GlobSetBuilder::new();
    let mut exclude = GlobSetBuilder::new();
    for pattern in patterns {
        let (target, pattern) = match pattern.strip_prefix('!') {
            Some(negated) => (&mut exclude, negated),
            None => (&mut include, pattern),
        };
        let pattern = pattern.trim_start_matches("./").trim_end_matches('/');
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .with_context(|| format!("invalid workspace pattern '{pattern}'"))?;
        target.add(glob);
    }
    Ok((
        include.build().context("build workspace patterns")?,
        exclude.build().context("build workspace patterns")?,
    ))
}

/// Directories below `root` that contain a manifest, skipping dependency
/// and hidden directories.
fn package_dirs(root: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.file_type().is_dir() && !is_skipped(entry));
    for entry in walker {
        let entry = entry.with_context(|| format!("walk {}", root.display()))?;
        if entry.path().join(MANIFEST_FILE).is_file() {
            dirs.push(entry.into_path());
        }
    }
    Ok(dirs)
}

fn is_skipped(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    name == "node_modules" || name.starts_with('.')
}

fn relative(root: &Path, dir: &Path) -> String {
    dir.strip_prefix(root)
        .unwrap_or(dir)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_manifest(dir: &Path, manifest: Value) {
        fs::create_dir_all(dir).expect("create dir");
        fs::write(dir.join(MANIFEST_FILE), manifest.to_string()).expect("write manifest");
    }

    #[test]
    fn missing_manifest_yields_synthetic_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        let project = load_project(temp.path()).expect("load");
        assert!(project.root.is_root());
        assert!(project.packages.is_empty());
        assert_eq!(project.root.manifest, json!({}));
    }

    #[test]
    fn discovers_workspace_packages_sorted() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        write_manifest(root, json!({ "name": "mono", "workspaces": ["packages/*", "!packages/skip"] }));
        write_manifest(&root.join("packages/zeta"), json!({ "name": "@mono/zeta" }));
        write_manifest(&root.join("packages/alpha"), json!({ "name": "@mono/alpha" }));
        write_manifest(&root.join("packages/skip"), json!({ "name": "skip" }));
        write_manifest(&root.join("packages/alpha/node_modules/dep"), json!({ "name": "dep" }));
        write_manifest(&root.join("tools/cli"), json!({ "name": "cli" }));

        let project = load_project(root).expect("load");
        assert_eq!(project.root.name, "mono");
        let names: Vec<&str> = project.packages.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["@mono/alpha", "@mono/zeta"]);
        assert_eq!(project.packages[0].rel_path, "packages/alpha");
        assert!(project.package("@mono/zeta").is_some());
    }

    #[test]
    fn workspaces_object_form_is_supported() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        write_manifest(root, json!({ "name": "mono", "workspaces": { "packages": ["libs/*"] } }));
        write_manifest(&root.join("libs/core"), json!({}));
        let project = load_project(root).expect("load");
        assert_eq!(project.packages.len(), 1);
        assert_eq!(project.packages[0].name, "core");
    }

    #[test]
    fn duplicate_package_names_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        write_manifest(root, json!({ "name": "mono", "workspaces": ["packages/*"] }));
        write_manifest(&root.join("packages/a"), json!({ "name": "same" }));
        write_manifest(&root.join("packages/b"), json!({ "name": "same" }));
        let err = load_project(root).expect_err("duplicate");
        assert!(err.to_string().contains("not unique"));
    }
}

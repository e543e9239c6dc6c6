//! Dependency-list edits of package manifests.
//!
//! The engine only edits manifest dependency lists; installation is delegated.
//! Every alias the engine writes is recorded in the manifest's
//! `converge.managedDependencies` section together with its policy, so later
//! runs can tell engine-owned entries from ones a human took over.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::core::types::CallSite;

pub const MANAGED_SECTION: &str = "converge";
pub const MANAGED_KEY: &str = "managedDependencies";

/// Manifest dependency list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DependencyList {
    #[serde(rename = "dependencies")]
    Dependencies,
    #[serde(rename = "devDependencies")]
    DevDependencies,
    #[serde(rename = "peerDependencies")]
    PeerDependencies,
    #[serde(rename = "optionalDependencies")]
    OptionalDependencies,
}

impl DependencyList {
    pub const ALL: [DependencyList; 4] = [
        DependencyList::Dependencies,
        DependencyList::DevDependencies,
        DependencyList::PeerDependencies,
        DependencyList::OptionalDependencies,
    ];

    pub fn key(self) -> &'static str {
        match self {
            DependencyList::Dependencies => "dependencies",
            DependencyList::DevDependencies => "devDependencies",
            DependencyList::PeerDependencies => "peerDependencies",
            DependencyList::OptionalDependencies => "optionalDependencies",
        }
    }
}

/// How much of a dependency the engine owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Management {
    /// Only presence; an existing version is kept.
    Presence,
    /// Presence and version.
    Version,
}

impl Management {
    pub fn label(self) -> &'static str {
        match self {
            Management::Presence => "presence",
            Management::Version => "version",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSpec {
    /// A concrete version, used as-is.
    Pinned(String),
    /// A dist-tag resolved through the registry (e.g. `latest`).
    Tag(String),
}

/// Options of [`crate::core::collect::RecipeBuilder::ensure_dependency`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsureDependency {
    /// Install under a different name (`npm:` alias).
    pub alias: Option<String>,
    pub list: DependencyList,
    pub managed: Management,
    pub skip_if_exists: bool,
    pub range_prefix: String,
    pub version: VersionSpec,
}

impl Default for EnsureDependency {
    fn default() -> Self {
        Self {
            alias: None,
            list: DependencyList::Dependencies,
            managed: Management::Presence,
            skip_if_exists: true,
            range_prefix: "^".to_string(),
            version: VersionSpec::Tag("latest".to_string()),
        }
    }
}

impl EnsureDependency {
    pub fn dev() -> Self {
        Self {
            list: DependencyList::DevDependencies,
            ..Self::default()
        }
    }

    pub fn pinned(mut self, version: impl Into<String>) -> Self {
        self.version = VersionSpec::Pinned(version.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.version = VersionSpec::Tag(tag.into());
        self
    }

    pub fn managed(mut self, managed: Management) -> Self {
        self.managed = managed;
        self
    }

    pub fn skip_if_exists(mut self, skip: bool) -> Self {
        self.skip_if_exists = skip;
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn range_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.range_prefix = prefix.into();
        self
    }
}

/// A queued dependency requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEntry {
    pub name: String,
    pub options: EnsureDependency,
    /// Target package name.
    pub package: String,
    pub feature: String,
    pub site: CallSite,
}

impl DependencyEntry {
    pub fn alias(&self) -> &str {
        self.options.alias.as_deref().unwrap_or(&self.name)
    }
}

/// Version lookup by dist-tag.
pub trait PackageRegistry {
    fn resolve_version(&self, name: &str, tag: &str) -> Result<String>;
}

/// Memoizes lookups for the duration of one apply.
pub struct MemoRegistry<'r> {
    inner: &'r dyn PackageRegistry,
    memo: RefCell<HashMap<(String, String), String>>,
}

impl<'r> MemoRegistry<'r> {
    pub fn new(inner: &'r dyn PackageRegistry) -> Self {
        Self {
            inner,
            memo: RefCell::new(HashMap::new()),
        }
    }
}

impl PackageRegistry for MemoRegistry<'_> {
    fn resolve_version(&self, name: &str, tag: &str) -> Result<String> {
        let key = (name.to_string(), tag.to_string());
        if let Some(version) = self.memo.borrow().get(&key) {
            return Ok(version.clone());
        }
        let version = self.inner.resolve_version(name, tag)?;
        self.memo.borrow_mut().insert(key, version.clone());
        Ok(version)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyChange {
    Added,
    Changed,
    Unchanged,
}

/// Ensure `entry` in `manifest`.
///
/// - With `skip_if_exists`, an alias present in any dependency list is left
///   alone.
/// - A presence-managed alias with an existing version keeps that version.
/// - Otherwise the version is pinned or looked up by tag.
pub fn ensure_dependency_in(
    manifest: &mut Value,
    entry: &DependencyEntry,
    registry: &dyn PackageRegistry,
) -> Result<DependencyChange> {
    let alias = entry.alias().to_string();
    let options = &entry.options;
    let root = manifest
        .as_object_mut()
        .ok_or_else(|| anyhow!("manifest is not a JSON object"))?;

    if options.skip_if_exists && find_in_any_list(root, &alias).is_some() {
        debug!(alias = %alias, "dependency exists, skipping");
        return Ok(DependencyChange::Unchanged);
    }

    let list_key = options.list.key();
    let existing = root
        .get(list_key)
        .and_then(|list| list.get(&alias))
        .and_then(Value::as_str)
        .map(str::to_string);

    let spec = match (&existing, options.managed) {
        (Some(existing), Management::Presence) => existing.clone(),
        _ => {
            let version = match &options.version {
                VersionSpec::Pinned(version) => version.clone(),
                VersionSpec::Tag(tag) => registry.resolve_version(&entry.name, tag)?,
            };
            if alias == entry.name {
                format!("{}{}", options.range_prefix, version)
            } else {
                format!("npm:{}@{}{}", entry.name, options.range_prefix, version)
            }
        }
    };

    let list = object_entry(root, list_key)?;
    list.insert(alias.clone(), Value::String(spec.clone()));
    sort_keys(list);

    let managed = object_entry(object_entry(root, MANAGED_SECTION)?, MANAGED_KEY)?;
    managed.insert(alias, Value::String(options.managed.label().to_string()));
    sort_keys(managed);

    Ok(match existing {
        None => DependencyChange::Added,
        Some(previous) if previous == spec => DependencyChange::Unchanged,
        Some(_) => DependencyChange::Changed,
    })
}

/// Remove engine-managed aliases that no feature ensured in this apply.
///
/// Returns the removed aliases in sorted order.
pub fn remove_stale_managed(manifest: &mut Value, ensured: &HashSet<String>) -> Vec<String> {
    let Some(root) = manifest.as_object_mut() else {
        return Vec::new();
    };
    let stale: Vec<String> = root
        .get(MANAGED_SECTION)
        .and_then(|section| section.get(MANAGED_KEY))
        .and_then(Value::as_object)
        .map(|managed| {
            managed
                .keys()
                .filter(|alias| !ensured.contains(*alias))
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    if stale.is_empty() {
        return stale;
    }

    for alias in &stale {
        for list in DependencyList::ALL {
            if let Some(deps) = root.get_mut(list.key()).and_then(Value::as_object_mut) {
                deps.remove(alias);
            }
        }
    }
    if let Some(section) = root.get_mut(MANAGED_SECTION).and_then(Value::as_object_mut) {
        if let Some(managed) = section.get_mut(MANAGED_KEY).and_then(Value::as_object_mut) {
            for alias in &stale {
                managed.remove(alias);
            }
            if managed.is_empty() {
                section.remove(MANAGED_KEY);
            }
        }
        if section.is_empty() {
            root.remove(MANAGED_SECTION);
        }
    }

    let mut removed = stale;
    removed.sort();
    removed
}

/// Merge dependency overrides into the manifest's `resolutions` object.
///
/// Returns the number of added or changed entries.
pub fn apply_resolutions(manifest: &mut Value, resolutions: &BTreeMap<String, String>) -> Result<usize> {
    if resolutions.is_empty() {
        return Ok(0);
    }
    let root = manifest
        .as_object_mut()
        .ok_or_else(|| anyhow!("manifest is not a JSON object"))?;
    let section = object_entry(root, "resolutions")?;
    let mut changes = 0;
    for (name, range) in resolutions {
        let next = Value::String(range.clone());
        if section.get(name) != Some(&next) {
            section.insert(name.clone(), next);
            changes += 1;
        }
    }
    Ok(changes)
}

/// Counts of one manifest's convergence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestChanges {
    pub added: usize,
    pub changed: usize,
    pub removed: usize,
}

/// Why a manifest could not be converged.
#[derive(Debug)]
pub enum ManifestFailure<'e> {
    /// One requirement could not be ensured.
    Entry {
        entry: &'e DependencyEntry,
        error: anyhow::Error,
    },
    /// The `resolutions` overrides could not be merged.
    Resolutions { error: anyhow::Error },
}

/// Converge one manifest: ensure every entry, drop stale managed aliases, and
/// merge resolutions. Works on a copy, so a failure leaves `manifest` intact.
pub fn converge_manifest<'e>(
    manifest: &Value,
    entries: &[&'e DependencyEntry],
    resolutions: Option<&BTreeMap<String, String>>,
    registry: &dyn PackageRegistry,
) -> Result<(Value, ManifestChanges), ManifestFailure<'e>> {
    let mut next = manifest.clone();
    let mut changes = ManifestChanges::default();
    let mut ensured = HashSet::new();

    for entry in entries.iter().copied() {
        ensured.insert(entry.alias().to_string());
        match ensure_dependency_in(&mut next, entry, registry) {
            Ok(DependencyChange::Added) => changes.added += 1,
            Ok(DependencyChange::Changed) => changes.changed += 1,
            Ok(DependencyChange::Unchanged) => {}
            Err(error) => return Err(ManifestFailure::Entry { entry, error }),
        }
    }
    changes.removed = remove_stale_managed(&mut next, &ensured).len();

    if let Some(resolutions) = resolutions {
        changes.changed += apply_resolutions(&mut next, resolutions)
            .map_err(|error| ManifestFailure::Resolutions { error })?;
    }

    Ok((next, changes))
}

fn find_in_any_list<'m>(root: &'m Map<String, Value>, alias: &str) -> Option<&'m Value> {
    DependencyList::ALL
        .iter()
        .find_map(|list| root.get(list.key()).and_then(|deps| deps.get(alias)))
}

fn object_entry<'m>(root: &'m mut Map<String, Value>, key: &str) -> Result<&'m mut Map<String, Value>> {
    let value = root
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    match value {
        Value::Object(map) => Ok(map),
        _ => bail!("manifest field '{key}' is not an object"),
    }
}

fn sort_keys(map: &mut Map<String, Value>) {
    let mut entries: Vec<(String, Value)> = std::mem::take(map).into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    map.extend(entries);
}

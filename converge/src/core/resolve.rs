//! Content pass: resolve every declared file against the complete registry.
//!
//! The metadata pass ([`crate::core::collect`]) fixes every path, kind and
//! attribute set. Only then is content computed, so a file may depend on
//! knowledge of every other file the feature set produces (an aggregated
//! ignore file, for instance). Content functions only get shared references.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::collect::{CollectedState, Content, EditableSpec, IfNotExists, SlotBody};
use crate::core::error::ApplyError;
use crate::core::types::{FileAttributes, FileKind, PackageEntry, Project};

/// One `(path, kind)` pair visible to content functions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryEntry {
    /// Project-relative path, or pattern for ignored entries.
    pub path: String,
    pub kind: FileKind,
    pub attributes: FileAttributes,
    pub package: String,
}

/// Read-only view of every file the feature set declares, sorted by path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileRegistry {
    entries: Vec<RegistryEntry>,
}

impl FileRegistry {
    pub fn from_state(state: &CollectedState) -> Self {
        let mut entries: Vec<RegistryEntry> = state
            .files
            .values()
            .map(|slot| RegistryEntry {
                path: slot.path.clone(),
                kind: slot.kind,
                attributes: slot.attributes,
                package: slot.package.clone(),
            })
            .collect();
        entries.extend(state.ignored.iter().map(|ignored| RegistryEntry {
            path: ignored.pattern.clone(),
            kind: FileKind::Ignored,
            attributes: FileAttributes::default_for(FileKind::Ignored),
            package: ignored.package.clone(),
        }));
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Self { entries }
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    pub fn get(&self, path: &str) -> Option<&RegistryEntry> {
        self.entries.iter().find(|entry| entry.path == path)
    }

    /// Paths under `package` matching `filter`, relative to the package
    /// directory, sorted and without duplicates.
    pub fn relative_paths(
        &self,
        package: &PackageEntry,
        filter: impl Fn(&RegistryEntry) -> bool,
    ) -> Vec<String> {
        let prefix = if package.is_root() {
            String::new()
        } else {
            format!("{}/", package.rel_path)
        };
        let mut paths: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| filter(entry))
            .filter_map(|entry| entry.path.strip_prefix(prefix.as_str()))
            .map(str::to_string)
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }
}

/// Desired state of one file after the content pass.
pub enum Desired<'s> {
    /// Final text of a generated file.
    Text(String),
    /// A user-editable merge, evaluated against the on-disk content.
    Merge(&'s EditableSpec),
}

pub struct ResolvedFile<'s> {
    pub path: &'s str,
    pub package: &'s PackageEntry,
    pub kind: FileKind,
    pub attributes: FileAttributes,
    pub contributors: &'s [String],
    pub desired: Desired<'s>,
}

/// Resolve the content of every declared file, in path order.
pub fn resolve<'s>(
    state: &'s CollectedState,
    project: &'s Project,
) -> Result<(FileRegistry, Vec<ResolvedFile<'s>>), ApplyError> {
    let registry = FileRegistry::from_state(state);
    let mut resolved = Vec::with_capacity(state.files.len());

    for slot in state.files.values() {
        let package = project.package(&slot.package).ok_or_else(|| {
            ApplyError::config(None, format!("'{}' targets unknown package '{}'", slot.path, slot.package))
        })?;
        let desired = match &slot.body {
            SlotBody::Generated { base, transforms } => {
                let Some(base) = base else {
                    let feature = slot.contributors.first().map(String::as_str);
                    return Err(ApplyError::config(
                        feature,
                        format!(
                            "'{}' is modified but never generated (first referenced at {})",
                            slot.path, slot.first_site
                        ),
                    ));
                };
                let mut text = match &base.value {
                    Content::Literal(text) => text.clone(),
                    Content::Resolved(resolver) => resolver(&registry, package),
                };
                for transform in transforms {
                    text = (transform.value)(text);
                }
                Desired::Text(text)
            }
            SlotBody::UserEditable(spec) => Desired::Merge(spec),
        };
        resolved.push(ResolvedFile {
            path: &slot.path,
            package,
            kind: slot.kind,
            attributes: slot.attributes,
            contributors: &slot.contributors,
            desired,
        });
    }

    Ok((registry, resolved))
}

/// Merge a user-editable file: parse the on-disk text (or start from the
/// codec's empty value), apply every transform in order, stringify.
///
/// Returns `None` when the file is absent and the policy is to skip it.
pub fn merge(spec: &EditableSpec, disk: Option<&str>, package: &PackageEntry) -> Result<Option<String>> {
    let mut value = match disk {
        Some(text) => spec
            .codec
            .parse(text)
            .with_context(|| format!("parse with {} codec", spec.codec.name()))?,
        None if spec.if_not_exists == IfNotExists::Skip => return Ok(None),
        None => spec.codec.empty(),
    };
    for transform in &spec.transforms {
        value = (transform.value)(value, package);
    }
    spec.codec
        .stringify(&value)
        .with_context(|| format!("stringify with {} codec", spec.codec.name()))
        .map(Some)
}

//! The apply pipeline: converge a project directory toward the desired state
//! of a feature set.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::collect::{CollectedState, run_recipes};
use crate::core::dependency::{
    DependencyEntry, ManifestChanges, ManifestFailure, MemoRegistry, PackageRegistry,
    converge_manifest,
};
use crate::core::error::ApplyError;
use crate::core::feature::FeatureDefinition;
use crate::core::peer_context::propagate;
use crate::core::reconcile::{DiskState, IgnoreSet, Plan, plan};
use crate::core::resolve::resolve;
use crate::core::scheduler::{normalize_features, schedule};
use crate::core::types::{
    FeatureOptions, FileFailure, PackageEntry, Project, Summary, TaskEntry,
};
use crate::io::cache::CacheStore;
use crate::io::disk::{execute, snapshot};
use crate::io::manifest::{manifest_path, render_manifest, write_manifest};
use crate::io::project::{MANIFEST_FILE, load_project};

pub const DEFAULT_CACHE_PATH: &str = ".converge/cache.json";

/// The feature set and its options for one apply.
pub struct Config {
    pub features: Vec<FeatureDefinition>,
    pub options: FeatureOptions,
    /// Reconciliation cache, relative to the project root.
    pub cache_path: PathBuf,
}

impl Config {
    pub fn new(features: Vec<FeatureDefinition>) -> Self {
        Self {
            features,
            options: FeatureOptions::default(),
            cache_path: PathBuf::from(DEFAULT_CACHE_PATH),
        }
    }

    pub fn with_options(mut self, options: FeatureOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cache_path(mut self, cache_path: impl Into<PathBuf>) -> Self {
        self.cache_path = cache_path.into();
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Escalate manual review items to [`ApplyError::ManualChanges`] before
    /// anything is written.
    pub throw_on_manual_changes: bool,
}

#[derive(Debug, Serialize)]
pub struct ApplyOutcome {
    pub project: Project,
    pub summary: Summary,
    /// Tasks defined by the feature set, in definition order.
    pub tasks: Vec<TaskEntry>,
}

/// Converge `root` toward the desired state of `config`.
///
/// Config, scheduling and recipe errors abort before anything is written.
/// Dependency edits are resolved for every manifest before any write. When a
/// manifest is itself a declared file, its edits are folded into the planned
/// content so one write carries both. File operations settle independently;
/// their failures land in `summary.failures` and set `summary.failed`. A
/// failed lookup still lets the files converge but writes no dependency
/// edit.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn apply(
    root: &Path,
    config: &Config,
    registry: &dyn PackageRegistry,
    options: &ApplyOptions,
) -> Result<ApplyOutcome, ApplyError> {
    let started = Instant::now();
    let mut summary = Summary::default();

    let project = load_project(root)?;
    let (features, warnings) = normalize_features(&config.features);
    summary.warnings.extend(warnings);
    let scheduled = schedule(&features)?;
    info!(
        order = %scheduled.iter().map(|f| f.name.as_str()).collect::<Vec<_>>().join(","),
        "features scheduled"
    );

    let (store, warnings) = propagate(&scheduled, &config.options)?;
    summary.warnings.extend(warnings);
    let state = run_recipes(&scheduled, &store, &project, &config.options)?;
    summary.warnings.extend(state.warnings.iter().cloned());

    let (_, resolved) = resolve(&state, &project)?;
    let ignore = IgnoreSet::new(state.ignored.iter().map(|entry| entry.pattern.as_str()))?;
    let (mut cache, warning) = CacheStore::load(&root.join(&config.cache_path))?;
    summary.warnings.extend(warning);

    let paths: BTreeSet<&str> = resolved
        .iter()
        .map(|file| file.path)
        .chain(cache.entries().keys().map(String::as_str))
        .collect();
    let disk = snapshot(root, paths);
    let mut plan = plan(&resolved, cache.entries(), &disk, &ignore);

    let review = plan.review_items();
    if options.throw_on_manual_changes && !review.is_empty() {
        warn!(items = review.len(), "manual changes detected, aborting");
        return Err(ApplyError::ManualChanges { items: review });
    }

    let updates = match plan_manifests(&project, &state, &plan, registry) {
        Ok(updates) => updates,
        Err(err) => {
            warn!(err = %err, "dependency resolution failed, no manifest edit written");
            execute(root, &plan, &mut cache, &mut summary);
            return Err(err);
        }
    };

    let mut folded = Vec::new();
    let mut standalone = Vec::new();
    for update in updates {
        let text = render_manifest(&update.manifest)?;
        let on_disk = disk.get(&update.path).unwrap_or(&DiskState::Missing);
        if plan.replace_content(&update.path, text, on_disk, cache.entries().get(&update.path)) {
            debug!(path = %update.path, "dependency edits folded into planned manifest");
            folded.push(update);
        } else {
            standalone.push(update);
        }
    }

    execute(root, &plan, &mut cache, &mut summary);
    for update in &folded {
        if !summary.failures.iter().any(|failure| failure.path == update.path) {
            count_changes(&mut summary, &update.changes);
        }
    }
    write_manifests(&standalone, &state, &mut summary);

    summary.duration_ms = started.elapsed().as_millis();
    info!(
        writes = summary.writes(),
        needs_review = summary.needs_review,
        failed = summary.failed,
        duration_ms = summary.duration_ms,
        "apply finished"
    );
    Ok(ApplyOutcome {
        project,
        summary,
        tasks: state.tasks,
    })
}

/// A manifest whose dependency edits are resolved but not yet written.
struct ManifestUpdate<'p> {
    package: &'p PackageEntry,
    /// Project-relative manifest path.
    path: String,
    manifest: Value,
    changes: ManifestChanges,
}

/// Resolve the dependency edits of every package manifest.
///
/// Each manifest starts from the content the plan is about to write, or from
/// disk when the plan leaves it alone. Any failure rejects every edit.
fn plan_manifests<'p>(
    project: &'p Project,
    state: &CollectedState,
    plan: &Plan,
    registry: &dyn PackageRegistry,
) -> Result<Vec<ManifestUpdate<'p>>, ApplyError> {
    let registry = MemoRegistry::new(registry);
    let mut updates = Vec::new();

    for package in project.all_packages() {
        let path = package.project_path(MANIFEST_FILE);
        let base = manifest_base(package, &path, plan)?;
        let entries: Vec<&DependencyEntry> = state
            .dependencies
            .iter()
            .filter(|entry| entry.package == package.name)
            .collect();
        let resolutions =
            Some(&state.resolutions).filter(|r| package.is_root() && !r.is_empty());
        let (next, changes) = converge_manifest(&base, &entries, resolutions, &registry)
            .map_err(|failure| dependency_error(package, state, failure))?;
        if next != base {
            updates.push(ManifestUpdate {
                package,
                path,
                manifest: next,
                changes,
            });
        }
    }
    Ok(updates)
}

fn manifest_base(package: &PackageEntry, path: &str, plan: &Plan) -> Result<Value, ApplyError> {
    let Some(file) = plan.get(path) else {
        return Ok(package.manifest.clone());
    };
    match file.decision.content() {
        Some(content) => serde_json::from_str(content).map_err(|err| {
            ApplyError::config(
                file.features.first().map(String::as_str),
                format!("planned content of '{path}' is not a JSON manifest: {err}"),
            )
        }),
        None => Ok(package.manifest.clone()),
    }
}

fn dependency_error(
    package: &PackageEntry,
    state: &CollectedState,
    failure: ManifestFailure<'_>,
) -> ApplyError {
    match failure {
        ManifestFailure::Entry { entry, error } => ApplyError::DependencyResolution {
            package: package.name.clone(),
            dependency: entry.name.clone(),
            feature: entry.feature.clone(),
            message: format!("{error:#} (at {})", entry.site),
        },
        ManifestFailure::Resolutions { error } => ApplyError::DependencyResolution {
            package: package.name.clone(),
            dependency: "resolutions".to_string(),
            feature: state.resolution_features.join(", "),
            message: format!("{error:#}"),
        },
    }
}

/// Write manifests that are not declared files of this apply.
fn write_manifests(updates: &[ManifestUpdate<'_>], state: &CollectedState, summary: &mut Summary) {
    for update in updates {
        match write_manifest(&manifest_path(update.package), &update.manifest) {
            Ok(()) => count_changes(summary, &update.changes),
            Err(err) => {
                warn!(package = %update.package.name, err = %err, "manifest write failed");
                summary.failures.push(FileFailure {
                    path: update.path.clone(),
                    features: contributing_features(state, &update.package.name),
                    operation: "write manifest".to_string(),
                    message: format!("{err:#}"),
                });
                summary.failed = true;
            }
        }
    }
}

fn count_changes(summary: &mut Summary, changes: &ManifestChanges) {
    summary.dependencies_added += changes.added;
    summary.dependencies_changed += changes.changed;
    summary.dependencies_removed += changes.removed;
}

fn contributing_features(state: &CollectedState, package: &str) -> Vec<String> {
    let mut features: Vec<String> = Vec::new();
    for entry in state.dependencies.iter().filter(|entry| entry.package == package) {
        if !features.contains(&entry.feature) {
            features.push(entry.feature.clone());
        }
    }
    features
}

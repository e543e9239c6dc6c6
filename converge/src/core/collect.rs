//! Recipe execution and effect collection (the metadata pass).
//!
//! Recipes run strictly sequentially in scheduled order. Each receives a
//! [`RecipeBuilder`] that only queues effects into the shared
//! [`CollectedState`]; nothing is materialized until resolution.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::codec::Codec;
use crate::core::dependency::{DependencyEntry, EnsureDependency};
use crate::core::error::ApplyError;
use crate::core::feature::FeatureDefinition;
use crate::core::peer_context::PeerContextStore;
use crate::core::resolve::FileRegistry;
use crate::core::types::{
    CallSite, FeatureOptions, FileAttributes, FileKind, PackageEntry, Project, TaskEntry, TaskKind,
};

pub type ContentResolver = Box<dyn Fn(&FileRegistry, &PackageEntry) -> String>;
pub type GeneratedTransform = Box<dyn Fn(String) -> String>;
pub type EditableTransform = Box<dyn Fn(Value, &PackageEntry) -> Value>;

/// Base content of a generated file.
pub enum Content {
    Literal(String),
    /// Computed in the content pass from the complete file registry.
    Resolved(ContentResolver),
}

impl Content {
    pub fn resolved(f: impl Fn(&FileRegistry, &PackageEntry) -> String + 'static) -> Self {
        Content::Resolved(Box::new(f))
    }
}

impl From<String> for Content {
    fn from(value: String) -> Self {
        Content::Literal(value)
    }
}

impl From<&str> for Content {
    fn from(value: &str) -> Self {
        Content::Literal(value.to_string())
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Content::Literal(text) => f.debug_tuple("Literal").field(text).finish(),
            Content::Resolved(_) => f.write_str("Resolved(..)"),
        }
    }
}

/// Arguments of [`RecipeBuilder::generate_file`].
#[derive(Debug)]
pub struct GenerateFile {
    pub content: Content,
    pub attributes: FileAttributes,
}

impl GenerateFile {
    pub fn new(content: impl Into<Content>) -> Self {
        Self {
            content: content.into(),
            attributes: FileAttributes::default_for(FileKind::Generated),
        }
    }

    pub fn attributes(mut self, attributes: FileAttributes) -> Self {
        self.attributes = attributes;
        self
    }
}

/// What to do with a user-editable file that does not exist yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IfNotExists {
    /// Write the transforms applied to the codec's empty value.
    #[default]
    Create,
    /// Leave the file absent.
    Skip,
}

/// Arguments of [`RecipeBuilder::modify_user_editable_file`].
pub struct ModifyUserEditable {
    pub codec: Box<dyn Codec>,
    pub content: EditableTransform,
    pub if_not_exists: IfNotExists,
    pub attributes: Option<FileAttributes>,
}

impl ModifyUserEditable {
    pub fn new(
        codec: impl Codec + 'static,
        content: impl Fn(Value, &PackageEntry) -> Value + 'static,
    ) -> Self {
        Self {
            codec: Box::new(codec),
            content: Box::new(content),
            if_not_exists: IfNotExists::Create,
            attributes: None,
        }
    }

    pub fn if_not_exists(mut self, policy: IfNotExists) -> Self {
        self.if_not_exists = policy;
        self
    }

    pub fn attributes(mut self, attributes: FileAttributes) -> Self {
        self.attributes = Some(attributes);
        self
    }
}

/// A queued effect together with who declared it and where.
pub struct Contribution<T> {
    pub feature: String,
    pub site: CallSite,
    pub value: T,
}

pub struct EditableSpec {
    pub codec: Box<dyn Codec>,
    pub if_not_exists: IfNotExists,
    pub transforms: Vec<Contribution<EditableTransform>>,
}

pub enum SlotBody {
    Generated {
        /// Last `generate_file` declaration; `None` while only modifiers exist.
        base: Option<Contribution<Content>>,
        transforms: Vec<Contribution<GeneratedTransform>>,
    },
    UserEditable(EditableSpec),
}

/// Everything declared for one project-relative path.
///
/// A slot is created at the first reference to its path, by a declaration or
/// a modifier alike. Modifiers queue regardless of arrival order and the
/// chain resolves only after all recipes ran.
pub struct FileSlot {
    pub path: String,
    pub package: String,
    pub kind: FileKind,
    pub attributes: FileAttributes,
    pub body: SlotBody,
    /// Contributing features in scheduled order, without duplicates.
    pub contributors: Vec<String>,
    pub first_site: CallSite,
}

impl FileSlot {
    fn add_contributor(&mut self, feature: &str) {
        if !self.contributors.iter().any(|name| name == feature) {
            self.contributors.push(feature.to_string());
        }
    }
}

/// A glob excluded from generated-file bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoreEntry {
    /// Project-relative pattern.
    pub pattern: String,
    pub package: String,
    pub feature: String,
}

/// Accumulated effects of every recipe in one apply. Never persisted.
#[derive(Default)]
pub struct CollectedState {
    pub files: BTreeMap<String, FileSlot>,
    pub tasks: Vec<TaskEntry>,
    pub dependencies: Vec<DependencyEntry>,
    pub resolutions: BTreeMap<String, String>,
    /// Features that set resolutions, in scheduled order.
    pub resolution_features: Vec<String>,
    pub ignored: Vec<IgnoreEntry>,
    pub warnings: Vec<String>,
    errors: Vec<ApplyError>,
}

impl CollectedState {
    fn warn(&mut self, message: String) {
        warn!("{message}");
        self.warnings.push(message);
    }

    fn fail(&mut self, feature: &str, site: CallSite, message: String) {
        self.errors.push(ApplyError::config(
            Some(feature),
            format!("{message} (at {site})"),
        ));
    }
}

/// Run every recipe in scheduled order and collect their effects.
pub fn run_recipes(
    scheduled: &[&FeatureDefinition],
    store: &PeerContextStore,
    project: &Project,
    options: &FeatureOptions,
) -> Result<CollectedState, ApplyError> {
    let mut state = CollectedState::default();
    for feature in scheduled {
        debug!(feature = %feature.name, "running recipe");
        let context = store.context_for(&feature.name);
        let mut builder = RecipeBuilder {
            project,
            options,
            feature: &feature.name,
            package: &project.root,
            state: &mut state,
        };
        (feature.recipe)(&mut builder, &context).map_err(|err| ApplyError::Recipe {
            feature: feature.name.clone(),
            message: format!("{err:#}"),
        })?;
        if !state.errors.is_empty() {
            return Err(state.errors.remove(0));
        }
    }
    info!(
        files = state.files.len(),
        tasks = state.tasks.len(),
        dependencies = state.dependencies.len(),
        "recipes collected"
    );
    Ok(state)
}

/// Effect-queueing API handed to recipes, scoped to one target package.
pub struct RecipeBuilder<'a> {
    project: &'a Project,
    options: &'a FeatureOptions,
    feature: &'a str,
    package: &'a PackageEntry,
    state: &'a mut CollectedState,
}

impl<'a> RecipeBuilder<'a> {
    pub fn project(&self) -> &'a Project {
        self.project
    }

    /// The package this builder targets.
    pub fn target(&self) -> &'a PackageEntry {
        self.package
    }

    pub fn feature(&self) -> &str {
        self.feature
    }

    pub fn options(&self) -> &'a FeatureOptions {
        self.options
    }

    /// A builder scoped to the named package (root or sub-package).
    pub fn package(&mut self, name: &str) -> anyhow::Result<RecipeBuilder<'_>> {
        let package = self
            .project
            .package(name)
            .ok_or_else(|| anyhow::anyhow!("unknown package '{name}'"))?;
        Ok(RecipeBuilder {
            project: self.project,
            options: self.options,
            feature: self.feature,
            package,
            state: &mut *self.state,
        })
    }

    /// Declare a fully engine-owned file. The last declaration of a path wins.
    #[track_caller]
    pub fn generate_file(&mut self, path: &str, file: GenerateFile) {
        let site = CallSite::here();
        let Some(path) = self.project_path(path, site) else {
            return;
        };
        let feature = self.feature.to_string();
        let declared = Contribution {
            feature: feature.clone(),
            site,
            value: file.content,
        };
        let slot = match self.slot(&path, FileKind::Generated, site) {
            Some(slot) => slot,
            None => return,
        };
        slot.attributes = file.attributes;
        slot.add_contributor(&feature);
        let SlotBody::Generated { base, .. } = &mut slot.body else {
            return;
        };
        let previous = base.replace(declared).map(|prev| prev.feature);
        if let Some(previous) = previous {
            self.state.warn(format!(
                "feature '{feature}' overrides '{path}' previously generated by '{previous}' (at {site})"
            ));
        }
    }

    /// Append a transform to a generated file's chain.
    #[track_caller]
    pub fn modify_generated_file(&mut self, path: &str, f: impl Fn(String) -> String + 'static) {
        let site = CallSite::here();
        let Some(path) = self.project_path(path, site) else {
            return;
        };
        let feature = self.feature.to_string();
        let Some(slot) = self.slot(&path, FileKind::Generated, site) else {
            return;
        };
        slot.add_contributor(&feature);
        if let SlotBody::Generated { transforms, .. } = &mut slot.body {
            transforms.push(Contribution {
                feature,
                site,
                value: Box::new(f),
            });
        }
    }

    /// Register a parse → transform → stringify merge of a user-editable file.
    #[track_caller]
    pub fn modify_user_editable_file(&mut self, path: &str, modify: ModifyUserEditable) {
        let site = CallSite::here();
        let Some(path) = self.project_path(path, site) else {
            return;
        };
        let feature = self.feature.to_string();
        let ModifyUserEditable {
            codec,
            content,
            if_not_exists,
            attributes,
        } = modify;
        let codec_name = codec.name();

        let is_new = !self.state.files.contains_key(&path);
        let Some(slot) = self.slot(&path, FileKind::UserEditable, site) else {
            return;
        };
        if let Some(attributes) = attributes {
            slot.attributes = attributes;
        }
        slot.add_contributor(&feature);
        let SlotBody::UserEditable(spec) = &mut slot.body else {
            return;
        };
        if is_new {
            spec.codec = codec;
            spec.if_not_exists = if_not_exists;
        } else if spec.codec.name() != codec_name {
            let existing = spec.codec.name();
            self.state.fail(
                &feature,
                site,
                format!("'{path}' is modified with codec '{codec_name}' but was registered as '{existing}'"),
            );
            return;
        } else if if_not_exists == IfNotExists::Create {
            // Any contributor asking for creation wins over a skip policy.
            spec.if_not_exists = IfNotExists::Create;
        }
        spec.transforms.push(Contribution {
            feature,
            site,
            value: content,
        });
    }

    /// Queue a dependency requirement for the target package's manifest.
    #[track_caller]
    pub fn ensure_dependency(&mut self, name: &str, options: EnsureDependency) {
        let site = CallSite::here();
        self.state.dependencies.push(DependencyEntry {
            name: name.to_string(),
            options,
            package: self.package.name.clone(),
            feature: self.feature.to_string(),
            site,
        });
    }

    /// Register a task. The last definition for a package/name pair wins.
    #[track_caller]
    pub fn define_task(&mut self, name: &str, kind: TaskKind, definition: Value) {
        let site = CallSite::here();
        let package = self.package.name.clone();
        let entry = TaskEntry {
            name: name.to_string(),
            kind,
            definition,
            package: package.clone(),
            feature: self.feature.to_string(),
        };
        if let Some(existing) = self
            .state
            .tasks
            .iter_mut()
            .find(|task| task.package == package && task.name == name)
        {
            let previous = std::mem::replace(existing, entry);
            self.state.warn(format!(
                "feature '{}' redefines task '{name}' of package '{package}' from '{}' (at {site})",
                self.feature, previous.feature
            ));
            return;
        }
        self.state.tasks.push(entry);
    }

    /// Exclude a glob from generated-file bookkeeping.
    #[track_caller]
    pub fn ignore_file(&mut self, pattern: &str) {
        let site = CallSite::here();
        let Some(pattern) = self.project_path(pattern.trim_start_matches('/'), site) else {
            return;
        };
        if self.state.ignored.iter().any(|entry| entry.pattern == pattern) {
            return;
        }
        self.state.ignored.push(IgnoreEntry {
            pattern,
            package: self.package.name.clone(),
            feature: self.feature.to_string(),
        });
    }

    /// Queue manifest-level dependency overrides for the root manifest.
    #[track_caller]
    pub fn set_dependency_resolutions<I, K, V>(&mut self, resolutions: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let site = CallSite::here();
        if !self.state.resolution_features.iter().any(|f| f == self.feature) {
            self.state.resolution_features.push(self.feature.to_string());
        }
        for (name, range) in resolutions {
            let name = name.into();
            let range = range.into();
            let previous = self.state.resolutions.insert(name.clone(), range.clone());
            if let Some(previous) = previous.filter(|previous| *previous != range) {
                self.state.warn(format!(
                    "feature '{}' overrides resolution of '{name}' from '{previous}' to '{range}' (at {site})",
                    self.feature
                ));
            }
        }
    }

    fn project_path(&mut self, path: &str, site: CallSite) -> Option<String> {
        let invalid = path.is_empty()
            || path.starts_with('/')
            || path.split('/').any(|segment| segment == "..");
        if invalid {
            let feature = self.feature.to_string();
            self.state.fail(
                &feature,
                site,
                format!("path '{path}' must be relative and stay inside its package"),
            );
            return None;
        }
        Some(self.package.project_path(path))
    }

    /// Slot for `path`, created on first reference. Records a config error
    /// when the path was already claimed with a different kind.
    fn slot(&mut self, path: &str, kind: FileKind, site: CallSite) -> Option<&mut FileSlot> {
        let feature = self.feature.to_string();
        let package = self.package.name.clone();
        let existing_kind = self.state.files.get(path).map(|slot| slot.kind);
        if let Some(existing) = existing_kind.filter(|existing| *existing != kind) {
            self.state.fail(
                &feature,
                site,
                format!("'{path}' is declared {kind} but was already declared {existing}"),
            );
            return None;
        }
        match self.state.files.entry(path.to_string()) {
            Entry::Occupied(entry) => Some(entry.into_mut()),
            Entry::Vacant(entry) => Some(entry.insert(FileSlot {
                path: path.to_string(),
                package,
                kind,
                attributes: FileAttributes::default_for(kind),
                body: match kind {
                    FileKind::UserEditable => SlotBody::UserEditable(EditableSpec {
                        codec: Box::new(crate::core::codec::JsonCodec),
                        if_not_exists: IfNotExists::Create,
                        transforms: Vec::new(),
                    }),
                    FileKind::Generated | FileKind::Ignored => SlotBody::Generated {
                        base: None,
                        transforms: Vec::new(),
                    },
                },
                contributors: Vec::new(),
                first_site: site,
            })),
        }
    }
}

//! Feature definitions: the sole integration surface for feature authors.
//!
//! A feature is a plain value with a unique name, optional ordering
//! constraints, an optional seed for its own peer context, optional
//! transforms of other features' peer contexts, and a recipe that declares
//! effects through a [`RecipeBuilder`].

use std::fmt;

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::collect::RecipeBuilder;
use crate::core::peer_context::PeerContext;
use crate::core::types::FeatureOptions;

/// Ordering constraint of a feature.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum After {
    #[default]
    None,
    /// Run after each named feature.
    Names(Vec<String>),
    /// Run after every feature without this constraint (`"*"`).
    All,
}

impl After {
    pub fn names(&self) -> &[String] {
        match self {
            After::Names(names) => names,
            After::None | After::All => &[],
        }
    }
}

pub type PeerTransform = Box<dyn Fn(Value) -> Result<Value>>;
pub type PeerModifier = Box<dyn Fn(&FeatureOptions) -> Vec<PeerContextMod>>;
pub type Recipe = Box<dyn Fn(&mut RecipeBuilder<'_>, &PeerContext) -> Result<()>>;

/// A transform of another feature's peer context.
pub struct PeerContextMod {
    pub target: String,
    pub transform: PeerTransform,
}

impl PeerContextMod {
    pub fn new(target: impl Into<String>, transform: impl Fn(Value) -> Result<Value> + 'static) -> Self {
        Self {
            target: target.into(),
            transform: Box::new(transform),
        }
    }

    /// Transform the target's context through its declared Rust type.
    ///
    /// A target without a seed starts from `T::default()`.
    pub fn typed<T>(target: impl Into<String>, transform: impl Fn(T) -> T + 'static) -> Self
    where
        T: Serialize + DeserializeOwned + Default,
    {
        let target = target.into();
        let label = target.clone();
        Self::new(target, move |value| {
            let current = if value.is_null() {
                T::default()
            } else {
                serde_json::from_value(value)
                    .with_context(|| format!("decode peer context of '{label}'"))?
            };
            serde_json::to_value(transform(current))
                .with_context(|| format!("encode peer context of '{label}'"))
        })
    }
}

impl fmt::Debug for PeerContextMod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerContextMod")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

pub struct FeatureDefinition {
    pub name: String,
    pub after: After,
    pub initial_peer_context: Option<Value>,
    pub modify_peer_contexts: Option<PeerModifier>,
    pub recipe: Recipe,
}

impl FeatureDefinition {
    pub fn new(
        name: impl Into<String>,
        recipe: impl Fn(&mut RecipeBuilder<'_>, &PeerContext) -> Result<()> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            after: After::None,
            initial_peer_context: None,
            modify_peer_contexts: None,
            recipe: Box::new(recipe),
        }
    }

    pub fn after<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.after = After::Names(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn after_all(mut self) -> Self {
        self.after = After::All;
        self
    }

    /// Seed this feature's own peer context from a typed value.
    pub fn with_peer_context<T: Serialize>(mut self, initial: &T) -> Result<Self> {
        let value = serde_json::to_value(initial)
            .with_context(|| format!("encode initial peer context of '{}'", self.name))?;
        self.initial_peer_context = Some(value);
        Ok(self)
    }

    pub fn modify_peer_contexts(
        mut self,
        modifier: impl Fn(&FeatureOptions) -> Vec<PeerContextMod> + 'static,
    ) -> Self {
        self.modify_peer_contexts = Some(Box::new(modifier));
        self
    }
}

impl fmt::Debug for FeatureDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureDefinition")
            .field("name", &self.name)
            .field("after", &self.after)
            .field("initial_peer_context", &self.initial_peer_context)
            .field("modifies_peers", &self.modify_peer_contexts.is_some())
            .finish_non_exhaustive()
    }
}

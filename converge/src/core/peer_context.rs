//! Shared per-feature state that features seed and mutate to communicate.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::error::ApplyError;
use crate::core::feature::FeatureDefinition;
use crate::core::types::FeatureOptions;

/// The peer context a recipe observes for its own feature.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerContext {
    feature: String,
    value: Value,
}

impl PeerContext {
    pub fn new(feature: impl Into<String>, value: Value) -> Self {
        Self {
            feature: feature.into(),
            value,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_null()
    }

    /// Decode through the feature's declared type; `T::default()` when unseeded.
    pub fn get<T: DeserializeOwned + Default>(&self) -> Result<T> {
        if self.value.is_null() {
            return Ok(T::default());
        }
        serde_json::from_value(self.value.clone())
            .with_context(|| format!("decode peer context of '{}'", self.feature))
    }
}

/// Final peer contexts for one apply, keyed by feature name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeerContextStore {
    contexts: BTreeMap<String, Value>,
}

impl PeerContextStore {
    pub fn get(&self, feature: &str) -> Option<&Value> {
        self.contexts.get(feature)
    }

    /// Context handed to `feature`'s recipe (`null` when never seeded or mutated).
    pub fn context_for(&self, feature: &str) -> PeerContext {
        PeerContext::new(
            feature,
            self.contexts.get(feature).cloned().unwrap_or(Value::Null),
        )
    }
}

/// Seed and mutate peer contexts over `scheduled` features.
///
/// Both passes complete before any recipe runs:
/// 1. every feature with an initial context seeds `store[own name]`;
/// 2. every feature's `modify_peer_contexts` transforms are applied to their
///    targets in the mutating feature's scheduled position.
///
/// A recipe therefore observes its context after all contributors, composed
/// in scheduled order, whether or not they are related to it through `after`.
/// Transforms targeting a feature outside the set are skipped with a warning.
pub fn propagate(
    scheduled: &[&FeatureDefinition],
    options: &FeatureOptions,
) -> Result<(PeerContextStore, Vec<String>), ApplyError> {
    let mut store = PeerContextStore::default();
    let mut warnings = Vec::new();

    for feature in scheduled {
        if let Some(initial) = &feature.initial_peer_context {
            debug!(feature = %feature.name, "seeding peer context");
            store.contexts.insert(feature.name.clone(), initial.clone());
        }
    }

    for feature in scheduled {
        let Some(modifier) = &feature.modify_peer_contexts else {
            continue;
        };
        for peer_mod in modifier(options) {
            if !scheduled.iter().any(|f| f.name == peer_mod.target) {
                warn!(
                    feature = %feature.name,
                    target = %peer_mod.target,
                    "peer context target not enabled, skipping"
                );
                warnings.push(format!(
                    "feature '{}' modifies peer context of '{}', which is not enabled",
                    feature.name, peer_mod.target
                ));
                continue;
            }
            let current = store
                .contexts
                .remove(&peer_mod.target)
                .unwrap_or(Value::Null);
            let next = (peer_mod.transform)(current).map_err(|err| {
                ApplyError::config(
                    Some(&feature.name),
                    format!("peer context transform of '{}' failed: {err:#}", peer_mod.target),
                )
            })?;
            debug!(feature = %feature.name, target = %peer_mod.target, "peer context modified");
            store.contexts.insert(peer_mod.target, next);
        }
    }

    Ok((store, warnings))
}

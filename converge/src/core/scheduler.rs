//! Deterministic feature ordering over the `after` graph.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::core::error::ApplyError;
use crate::core::feature::{After, FeatureDefinition};

/// Drop features whose name was already seen (first occurrence wins).
///
/// Returns the kept features and one warning per dropped duplicate.
pub fn normalize_features(
    features: &[FeatureDefinition],
) -> (Vec<&FeatureDefinition>, Vec<String>) {
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(features.len());
    let mut warnings = Vec::new();
    for feature in features {
        if seen.insert(feature.name.as_str()) {
            kept.push(feature);
        } else {
            warn!(feature = %feature.name, "duplicate feature ignored");
            warnings.push(format!(
                "duplicate feature '{}' ignored (first definition wins)",
                feature.name
            ));
        }
    }
    (kept, warnings)
}

/// Order features so every `after` constraint is satisfied.
///
/// Features with `after: "*"` run last in their input order. The rest are
/// emitted in depth-first postorder, walking features in input order and each
/// feature's `after` names in listed order, so the result is stable for a
/// fixed input.
pub fn schedule<'a>(
    features: &[&'a FeatureDefinition],
) -> Result<Vec<&'a FeatureDefinition>, ApplyError> {
    let (tail, head): (Vec<_>, Vec<_>) = features
        .iter()
        .copied()
        .partition(|feature| feature.after == After::All);

    let index: HashMap<&str, &FeatureDefinition> = head
        .iter()
        .map(|feature| (feature.name.as_str(), *feature))
        .collect();
    let tail_names: HashSet<&str> = tail.iter().map(|feature| feature.name.as_str()).collect();

    for feature in &head {
        for dep in feature.after.names() {
            if tail_names.contains(dep.as_str()) {
                return Err(ApplyError::config(
                    Some(&feature.name),
                    format!("cannot run after '{dep}', which runs after all features"),
                ));
            }
            if !index.contains_key(dep.as_str()) {
                return Err(ApplyError::config(
                    Some(&feature.name),
                    format!("unknown after target '{dep}'"),
                ));
            }
        }
    }

    let mut visit = Visit {
        index: &index,
        done: HashSet::new(),
        stack: Vec::new(),
        order: Vec::with_capacity(features.len()),
    };
    for feature in head.iter().copied() {
        visit.visit(feature)?;
    }

    let mut order = visit.order;
    order.extend(tail);
    Ok(order)
}

struct Visit<'i, 'a> {
    index: &'i HashMap<&'a str, &'a FeatureDefinition>,
    done: HashSet<&'a str>,
    stack: Vec<&'a str>,
    order: Vec<&'a FeatureDefinition>,
}

impl<'a> Visit<'_, 'a> {
    fn visit(&mut self, feature: &'a FeatureDefinition) -> Result<(), ApplyError> {
        let name = feature.name.as_str();
        if self.done.contains(name) {
            return Ok(());
        }
        if let Some(pos) = self.stack.iter().position(|entry| *entry == name) {
            let mut cycle: Vec<String> = self.stack[pos..].iter().map(|n| n.to_string()).collect();
            cycle.push(name.to_string());
            return Err(ApplyError::Scheduling { cycle });
        }

        self.stack.push(name);
        let index = self.index;
        for dep in feature.after.names() {
            // Presence was checked before the walk.
            if let Some(dep_feature) = index.get(dep.as_str()).copied() {
                self.visit(dep_feature)?;
            }
        }
        self.stack.pop();

        self.done.insert(name);
        self.order.push(feature);
        Ok(())
    }
}

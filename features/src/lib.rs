//! Stock features and the name → constructor catalog used by the CLI.
//!
//! Each feature module exposes a `NAME` and a `feature()` constructor. The
//! engine itself knows nothing about this crate.

use anyhow::{Result, bail};
use converge::core::feature::FeatureDefinition;

pub mod editorconfig;
pub mod gitignore;
pub mod prettier;

pub type Constructor = fn() -> FeatureDefinition;

/// Every stock feature, sorted by name.
pub const CATALOG: &[(&str, Constructor)] = &[
    (editorconfig::NAME, editorconfig::feature),
    (gitignore::NAME, gitignore::feature),
    (prettier::NAME, prettier::feature),
];

pub fn names() -> impl Iterator<Item = &'static str> {
    CATALOG.iter().map(|(name, _)| *name)
}

/// Construct the features enabled in settings, in the listed order.
pub fn resolve_features(names: &[String]) -> Result<Vec<FeatureDefinition>> {
    names
        .iter()
        .map(|name| match CATALOG.iter().find(|(known, _)| known == name) {
            Some((_, constructor)) => Ok(constructor()),
            None => bail!(
                "unknown feature '{name}' (available: {})",
                self::names().collect::<Vec<_>>().join(", ")
            ),
        })
        .collect()
}

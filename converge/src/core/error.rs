//! Error contract of the apply pipeline.
//!
//! Fatal errors abort before (or, for dependencies, after) file writes and are
//! returned as [`ApplyError`]. Per-file I/O errors are not represented here:
//! they settle into [`crate::core::types::Summary::failures`].

use thiserror::Error;

use crate::core::types::ManualReviewItem;

#[derive(Debug, Error)]
pub enum ApplyError {
    /// Malformed config, unknown `after` target, conflicting declarations.
    #[error("config error{}: {message}", feature_suffix(.feature))]
    Config {
        feature: Option<String>,
        message: String,
    },

    /// Cycle in the `after` graph. `cycle` lists the features in order, with
    /// the first feature repeated at the end.
    #[error("scheduling error: dependency cycle {}", .cycle.join(" -> "))]
    Scheduling { cycle: Vec<String> },

    /// A feature recipe returned an error.
    #[error("recipe of feature '{feature}' failed: {message}")]
    Recipe { feature: String, message: String },

    /// Manual edits detected while `throw_on_manual_changes` is set.
    #[error("{} file(s) need manual review: {}", .items.len(), review_paths(.items))]
    ManualChanges { items: Vec<ManualReviewItem> },

    /// A registry lookup failed; no manifest was written.
    #[error(
        "dependency resolution failed for '{dependency}' in package '{package}' (feature '{feature}'): {message}"
    )]
    DependencyResolution {
        package: String,
        dependency: String,
        feature: String,
        message: String,
    },

    /// Setup I/O (settings, project, cache) failed before reconciliation.
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

impl ApplyError {
    pub fn config(feature: Option<&str>, message: impl Into<String>) -> Self {
        ApplyError::Config {
            feature: feature.map(str::to_string),
            message: message.into(),
        }
    }

    /// The feature the error originated from, when known.
    pub fn feature(&self) -> Option<&str> {
        match self {
            ApplyError::Config { feature, .. } => feature.as_deref(),
            ApplyError::Recipe { feature, .. } => Some(feature),
            ApplyError::DependencyResolution { feature, .. } => Some(feature),
            ApplyError::Scheduling { .. } | ApplyError::ManualChanges { .. } | ApplyError::Io(_) => {
                None
            }
        }
    }
}

fn feature_suffix(feature: &Option<String>) -> String {
    match feature {
        Some(name) => format!(" in feature '{name}'"),
        None => String::new(),
    }
}

fn review_paths(items: &[ManualReviewItem]) -> String {
    items
        .iter()
        .map(|item| item.path.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduling_error_names_cycle() {
        let err = ApplyError::Scheduling {
            cycle: vec!["a".to_string(), "b".to_string(), "a".to_string()],
        };
        assert_eq!(err.to_string(), "scheduling error: dependency cycle a -> b -> a");
    }

    #[test]
    fn config_error_names_feature() {
        let err = ApplyError::config(Some("lint"), "unknown after target 'fmt'");
        assert_eq!(
            err.to_string(),
            "config error in feature 'lint': unknown after target 'fmt'"
        );
        assert_eq!(err.feature(), Some("lint"));
    }
}

//! Project settings stored in `converge.toml` at the project root.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Component, Path};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::types::FeatureOptions;

pub const CONFIG_FILE: &str = "converge.toml";

/// Engine settings (TOML).
///
/// Edited by humans; missing fields default to values that work for a
/// fresh project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Enabled feature names, looked up in the feature catalog.
    pub features: Vec<String>,

    /// Fail before writing anything when a manual edit needs review.
    pub throw_on_manual_changes: bool,

    /// Reconciliation cache, relative to the project root.
    pub cache_path: String,

    /// Budget for one registry lookup.
    pub registry_timeout_secs: u64,

    /// Per-feature options, keyed by feature name.
    pub options: BTreeMap<String, Value>,

    pub registry: RegistrySettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RegistrySettings {
    /// Versions answered without asking the registry.
    pub pinned: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            features: vec!["gitignore".to_string(), "editorconfig".to_string()],
            throw_on_manual_changes: false,
            cache_path: ".converge/cache.json".to_string(),
            registry_timeout_secs: 30,
            options: BTreeMap::new(),
            registry: RegistrySettings::default(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for name in &self.features {
            if name.trim().is_empty() {
                return Err(anyhow!("features must not contain empty names"));
            }
            if !seen.insert(name.as_str()) {
                return Err(anyhow!("feature '{name}' is listed more than once"));
            }
        }
        if self.registry_timeout_secs == 0 {
            return Err(anyhow!("registry_timeout_secs must be > 0"));
        }
        let cache = Path::new(&self.cache_path);
        let escapes = cache
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if self.cache_path.trim().is_empty() || escapes {
            return Err(anyhow!(
                "cache_path must be a relative path inside the project, got '{}'",
                self.cache_path
            ));
        }
        Ok(())
    }

    pub fn feature_options(&self) -> FeatureOptions {
        FeatureOptions::new(self.options.clone())
    }
}

/// Load settings from a TOML file.
///
/// If the file is missing, returns `Settings::default()`.
pub fn load_config(path: &Path) -> Result<Settings> {
    if !path.exists() {
        let cfg = Settings::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: Settings =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write settings to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &Settings) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Replace `path` with `contents` through a sibling temp file.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents).with_context(|| format!("write temp {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, Settings::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE);
        let mut cfg = Settings::default();
        cfg.options
            .insert("editorconfig".to_string(), json!({ "indent_size": 4 }));
        cfg.registry
            .pinned
            .insert("prettier".to_string(), "3.3.3".to_string());
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
        assert!(!temp.path().join("converge.toml.tmp").exists());
    }

    #[test]
    fn parses_documented_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE);
        fs::write(
            &path,
            r#"
features = ["gitignore", "prettier"]
throw_on_manual_changes = true

[options.editorconfig]
indent_size = 2

[registry.pinned]
prettier = "3.3.3"
"#,
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.features, vec!["gitignore", "prettier"]);
        assert!(cfg.throw_on_manual_changes);
        assert_eq!(cfg.cache_path, ".converge/cache.json");
        assert_eq!(cfg.options["editorconfig"], json!({ "indent_size": 2 }));
        assert_eq!(cfg.registry.pinned["prettier"], "3.3.3");
    }

    #[test]
    fn duplicate_feature_is_rejected() {
        let cfg = Settings {
            features: vec!["gitignore".to_string(), "gitignore".to_string()],
            ..Settings::default()
        };
        let err = cfg.validate().expect_err("duplicate");
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn escaping_cache_path_is_rejected() {
        for bad in ["../cache.json", "/tmp/cache.json", ""] {
            let cfg = Settings {
                cache_path: bad.to_string(),
                ..Settings::default()
            };
            assert!(cfg.validate().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let cfg = Settings {
            registry_timeout_secs: 0,
            ..Settings::default()
        };
        assert!(cfg.validate().is_err());
    }
}

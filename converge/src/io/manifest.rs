//! Package manifest writes.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::debug;

use crate::core::types::PackageEntry;
use crate::io::config::write_atomic;
use crate::io::project::MANIFEST_FILE;

pub fn manifest_path(package: &PackageEntry) -> PathBuf {
    package.abs_path.join(MANIFEST_FILE)
}

/// Render a manifest the way npm does: two-space indent, trailing newline.
pub fn render_manifest(manifest: &Value) -> Result<String> {
    let mut buf = serde_json::to_string_pretty(manifest).context("serialize manifest")?;
    buf.push('\n');
    Ok(buf)
}

/// Atomically replace the manifest at `path`.
pub fn write_manifest(path: &Path, manifest: &Value) -> Result<()> {
    let buf = render_manifest(manifest)?;
    write_atomic(path, &buf)?;
    debug!(path = %path.display(), "manifest written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    #[test]
    fn writes_pretty_json_preserving_key_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(MANIFEST_FILE);
        let manifest = json!({ "name": "demo", "version": "1.0.0", "dependencies": { "b": "^1", "a": "^2" } });
        write_manifest(&path, &manifest).expect("write");
        let written = fs::read_to_string(&path).expect("read");
        assert!(written.starts_with("{\n  \"name\": \"demo\",\n  \"version\""));
        assert!(written.ends_with("}\n"));
        let b = written.find("\"b\"").expect("b");
        let a = written.find("\"a\"").expect("a");
        assert!(b < a);
    }
}

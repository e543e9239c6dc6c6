//! Package registry lookups.

use std::collections::BTreeMap;
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use regex::Regex;
use tracing::debug;

use crate::core::dependency::PackageRegistry;
use crate::io::process::run_bounded;

const OUTPUT_LIMIT_BYTES: usize = 64 * 1024;

static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d+\.\d+\.\d+(?:-[0-9A-Za-z.-]+)?(?:\+[0-9A-Za-z.-]+)?$")
        .expect("valid version regex")
});

/// Asks the npm CLI: `npm view <name>@<tag> version`.
#[derive(Debug, Clone)]
pub struct NpmRegistry {
    program: String,
    timeout: Duration,
}

impl NpmRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self::with_program("npm", timeout)
    }

    /// Use another npm-compatible executable.
    pub fn with_program(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

impl PackageRegistry for NpmRegistry {
    fn resolve_version(&self, name: &str, tag: &str) -> Result<String> {
        let spec = format!("{name}@{tag}");
        let mut cmd = Command::new(&self.program);
        cmd.args(["view", spec.as_str(), "version"]);
        let output = run_bounded(cmd, self.timeout, OUTPUT_LIMIT_BYTES)
            .with_context(|| format!("run {} view {spec}", self.program))?;
        if output.timed_out {
            bail!("{} view {spec} timed out after {}s", self.program, self.timeout.as_secs());
        }
        if !output.status.success() {
            bail!(
                "{} view {spec} failed ({}): {}",
                self.program,
                output.status,
                output.stderr.trim()
            );
        }
        let version = parse_view_output(&output.stdout)
            .with_context(|| format!("resolve {spec}"))?;
        debug!(name, tag, version = %version, "registry resolved version");
        Ok(version)
    }
}

/// Extract the version from `npm view` output.
///
/// A tag yields one bare version; a range may yield `name@x.y.z 'x.y.z'`
/// lines, in which case the last one is the highest match.
pub fn parse_view_output(stdout: &str) -> Result<String> {
    let Some(line) = stdout.lines().map(str::trim).rfind(|line| !line.is_empty()) else {
        bail!("no version published");
    };
    let candidate = line
        .rsplit(' ')
        .next()
        .unwrap_or(line)
        .trim_matches(|c| c == '\'' || c == '"');
    if !VERSION_RE.is_match(candidate) {
        bail!("unexpected registry output '{line}'");
    }
    Ok(candidate.to_string())
}

/// Answers pinned names from settings before falling back to `inner`.
pub struct PinnedRegistry<'r> {
    pinned: BTreeMap<String, String>,
    inner: &'r dyn PackageRegistry,
}

impl<'r> PinnedRegistry<'r> {
    pub fn new(pinned: BTreeMap<String, String>, inner: &'r dyn PackageRegistry) -> Self {
        Self { pinned, inner }
    }
}

impl PackageRegistry for PinnedRegistry<'_> {
    fn resolve_version(&self, name: &str, tag: &str) -> Result<String> {
        match self.pinned.get(name) {
            Some(version) => {
                debug!(name, version = %version, "pinned version");
                Ok(version.clone())
            }
            None => self.inner.resolve_version(name, tag),
        }
    }
}

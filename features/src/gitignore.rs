//! `.gitignore` built from the file registry.
//!
//! Runs after every other feature. Lists each registered path whose
//! `gitignore` attribute is set, plus the extra patterns other features push
//! into [`GitignoreContext`].

use anyhow::Result;
use serde::{Deserialize, Serialize};

use converge::core::collect::{Content, GenerateFile, RecipeBuilder};
use converge::core::feature::FeatureDefinition;
use converge::core::peer_context::PeerContext;
use converge::core::types::FileAttributes;

pub const NAME: &str = "gitignore";
pub const PATH: &str = ".gitignore";

/// Peer context of the `gitignore` feature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitignoreContext {
    /// Patterns listed in addition to the registry's paths.
    #[serde(default)]
    pub extra: Vec<String>,
}

pub fn feature() -> FeatureDefinition {
    FeatureDefinition::new(NAME, recipe).after_all()
}

fn recipe(b: &mut RecipeBuilder<'_>, ctx: &PeerContext) -> Result<()> {
    let context: GitignoreContext = ctx.get()?;
    let extra = context.extra;
    b.generate_file(
        PATH,
        GenerateFile::new(Content::resolved(move |registry, package| {
            let paths = registry.relative_paths(package, |entry| entry.attributes.gitignore);
            render(paths.into_iter().chain(extra.iter().cloned()))
        }))
        .attributes(FileAttributes::committed()),
    );
    Ok(())
}

/// One pattern per line, sorted, without duplicates.
fn render(patterns: impl Iterator<Item = String>) -> String {
    let mut patterns: Vec<String> = patterns
        .map(|pattern| pattern.trim().to_string())
        .filter(|pattern| !pattern.is_empty())
        .collect();
    patterns.sort();
    patterns.dedup();
    let mut out = String::new();
    for pattern in patterns {
        out.push_str(&pattern);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge::apply::{ApplyOptions, Config, apply};
    use converge::core::feature::PeerContextMod;
    use converge::test_support::{StaticRegistry, TestProject};
    use serde_json::json;

    #[test]
    fn render_sorts_and_dedups() {
        let out = render(
            ["dist", " coverage ", "", "dist"]
                .into_iter()
                .map(str::to_string),
        );
        assert_eq!(out, "coverage\ndist\n");
        assert_eq!(render(std::iter::empty()), "");
    }

    #[test]
    fn lists_generated_paths_and_context_extras() {
        let project = TestProject::new(json!({ "name": "site" }));
        let features = vec![
            feature(),
            FeatureDefinition::new("build", |b, _| {
                b.generate_file("dist/bundle.js", GenerateFile::new("//\n"));
                b.generate_file(
                    "README.md",
                    GenerateFile::new("# site\n").attributes(FileAttributes::committed()),
                );
                b.ignore_file("coverage/");
                Ok(())
            })
            .modify_peer_contexts(|_| {
                vec![PeerContextMod::typed(NAME, |mut ctx: GitignoreContext| {
                    ctx.extra.push("*.log".to_string());
                    ctx
                })]
            }),
        ];
        apply(
            project.root(),
            &Config::new(features),
            &StaticRegistry::new([]),
            &ApplyOptions::default(),
        )
        .expect("apply");
        assert_eq!(project.read(PATH), "*.log\ncoverage/\ndist/bundle.js\n");
    }
}

//! Prettier: config file, devDependency and a `format` task.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use converge::core::codec::JsonCodec;
use converge::core::collect::{ModifyUserEditable, RecipeBuilder};
use converge::core::dependency::EnsureDependency;
use converge::core::feature::{FeatureDefinition, PeerContextMod};
use converge::core::peer_context::PeerContext;
use converge::core::types::TaskKind;

use crate::gitignore::{self, GitignoreContext};

pub const NAME: &str = "prettier";
pub const PATH: &str = ".prettierrc.json";
pub const CACHE_LOCATION: &str = ".prettiercache";

/// `[options.prettier]` in `converge.toml`; seeds keys missing from the
/// config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PrettierOptions {
    pub print_width: u32,
    pub single_quote: bool,
    pub trailing_comma: String,
}

impl Default for PrettierOptions {
    fn default() -> Self {
        Self {
            print_width: 100,
            single_quote: false,
            trailing_comma: "all".to_string(),
        }
    }
}

pub fn feature() -> FeatureDefinition {
    FeatureDefinition::new(NAME, recipe).modify_peer_contexts(|_| {
        vec![PeerContextMod::typed(
            gitignore::NAME,
            |mut ctx: GitignoreContext| {
                ctx.extra.push(CACHE_LOCATION.to_string());
                ctx
            },
        )]
    })
}

fn recipe(b: &mut RecipeBuilder<'_>, _: &PeerContext) -> Result<()> {
    let options: PrettierOptions = b.options().get(NAME)?;
    let defaults = serde_json::to_value(&options)?;
    b.modify_user_editable_file(
        PATH,
        ModifyUserEditable::new(JsonCodec, move |value, _| seed_missing(value, &defaults)),
    );
    b.ensure_dependency("prettier", EnsureDependency::dev());
    b.define_task(
        "format",
        TaskKind::Format,
        json!({
            "command": format!("prettier --write --cache --cache-location {CACHE_LOCATION} ."),
        }),
    );
    Ok(())
}

/// Insert each key of `defaults` that `value` lacks. Non-object files are
/// left untouched.
fn seed_missing(mut value: Value, defaults: &Value) -> Value {
    if let (Some(target), Some(defaults)) = (value.as_object_mut(), defaults.as_object()) {
        for (key, default) in defaults {
            target
                .entry(key.clone())
                .or_insert_with(|| default.clone());
        }
    }
    value
}

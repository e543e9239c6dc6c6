//! `.editorconfig` with a managed `[*]` section.
//!
//! The file is user-editable: keys a human already set in `[*]` are left as
//! they are, missing ones are added from the feature options.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use converge::core::codec::LinesCodec;
use converge::core::collect::{ModifyUserEditable, RecipeBuilder};
use converge::core::feature::FeatureDefinition;
use converge::core::peer_context::PeerContext;

pub const NAME: &str = "editorconfig";
pub const PATH: &str = ".editorconfig";

/// `[options.editorconfig]` in `converge.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorconfigOptions {
    pub indent_style: String,
    pub indent_size: u32,
    pub end_of_line: String,
    pub insert_final_newline: bool,
}

impl Default for EditorconfigOptions {
    fn default() -> Self {
        Self {
            indent_style: "space".to_string(),
            indent_size: 2,
            end_of_line: "lf".to_string(),
            insert_final_newline: true,
        }
    }
}

impl EditorconfigOptions {
    fn settings(&self) -> Vec<(&'static str, String)> {
        vec![
            ("indent_style", self.indent_style.clone()),
            ("indent_size", self.indent_size.to_string()),
            ("end_of_line", self.end_of_line.clone()),
            ("insert_final_newline", self.insert_final_newline.to_string()),
        ]
    }
}

pub fn feature() -> FeatureDefinition {
    FeatureDefinition::new(NAME, recipe)
}

fn recipe(b: &mut RecipeBuilder<'_>, _: &PeerContext) -> Result<()> {
    let options: EditorconfigOptions = b.options().get(NAME)?;
    b.modify_user_editable_file(
        PATH,
        ModifyUserEditable::new(LinesCodec, move |value, _| merge_value(value, &options)),
    );
    Ok(())
}

/// Converge the codec's line array; anything else is returned untouched.
fn merge_value(value: Value, options: &EditorconfigOptions) -> Value {
    match serde_json::from_value::<Vec<String>>(value.clone()) {
        Ok(lines) => Value::from(converge_lines(lines, options)),
        Err(err) => {
            warn!(err = %err, "{PATH} is not a list of lines, leaving it as is");
            value
        }
    }
}

fn key_of(line: &str) -> Option<String> {
    let line = line.trim();
    if line.starts_with('#') || line.starts_with(';') || line.starts_with('[') {
        return None;
    }
    line.split_once('=')
        .map(|(key, _)| key.trim().to_ascii_lowercase())
}

fn is_section(line: &str) -> bool {
    line.trim_start().starts_with('[')
}

/// Add `root = true` to the preamble and every missing managed key to `[*]`.
fn converge_lines(mut lines: Vec<String>, options: &EditorconfigOptions) -> Vec<String> {
    let preamble_end = lines.iter().position(|line| is_section(line)).unwrap_or(lines.len());
    if !lines[..preamble_end]
        .iter()
        .any(|line| key_of(line).as_deref() == Some("root"))
    {
        lines.insert(0, "root = true".to_string());
    }

    let Some(start) = lines.iter().position(|line| line.trim() == "[*]") else {
        if lines.last().is_some_and(|line| !line.trim().is_empty()) {
            lines.push(String::new());
        }
        lines.push("[*]".to_string());
        lines.extend(
            options
                .settings()
                .into_iter()
                .map(|(key, value)| format!("{key} = {value}")),
        );
        return lines;
    };

    let end = lines[start + 1..]
        .iter()
        .position(|line| is_section(line))
        .map_or(lines.len(), |offset| start + 1 + offset);
    let present: Vec<String> = lines[start + 1..end].iter().filter_map(|line| key_of(line)).collect();
    let mut insert_at = lines[start + 1..end]
        .iter()
        .rposition(|line| !line.trim().is_empty())
        .map_or(start + 1, |offset| start + 2 + offset);
    for (key, value) in options.settings() {
        if present.iter().any(|existing| existing == key) {
            continue;
        }
        lines.insert(insert_at, format!("{key} = {value}"));
        insert_at += 1;
    }
    lines
}

//! Parse/stringify pairs for user-editable files.
//!
//! User-editable files are never replaced wholesale. The reconciler parses the
//! on-disk text into a [`Value`], runs the queued transforms, and stringifies
//! the result with the same codec.

use anyhow::{Context, Result};
use serde_json::Value;

pub trait Codec {
    /// Stable identifier; all modifiers of one path must agree on it.
    fn name(&self) -> &'static str;

    fn parse(&self, text: &str) -> Result<Value>;

    fn stringify(&self, value: &Value) -> Result<String>;

    /// Seed value used when the file does not exist yet.
    fn empty(&self) -> Value;
}

/// Pretty-printed JSON with two-space indent and a trailing newline.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn parse(&self, text: &str) -> Result<Value> {
        if text.trim().is_empty() {
            return Ok(self.empty());
        }
        serde_json::from_str(text).context("parse json")
    }

    fn stringify(&self, value: &Value) -> Result<String> {
        let mut buf = serde_json::to_string_pretty(value).context("serialize json")?;
        buf.push('\n');
        Ok(buf)
    }

    fn empty(&self) -> Value {
        Value::Object(serde_json::Map::new())
    }
}

/// TOML documents, mapped through the JSON data model.
#[derive(Debug, Clone, Copy, Default)]
pub struct TomlCodec;

impl Codec for TomlCodec {
    fn name(&self) -> &'static str {
        "toml"
    }

    fn parse(&self, text: &str) -> Result<Value> {
        let table: toml::Table = toml::from_str(text).context("parse toml")?;
        serde_json::to_value(table).context("convert toml to json value")
    }

    fn stringify(&self, value: &Value) -> Result<String> {
        let table: toml::Table =
            serde_json::from_value(value.clone()).context("convert json value to toml")?;
        toml::to_string_pretty(&table).context("serialize toml")
    }

    fn empty(&self) -> Value {
        Value::Object(serde_json::Map::new())
    }
}

/// Line-oriented text: an array of strings, one per line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinesCodec;

impl Codec for LinesCodec {
    fn name(&self) -> &'static str {
        "lines"
    }

    fn parse(&self, text: &str) -> Result<Value> {
        Ok(Value::Array(
            text.lines().map(|line| Value::String(line.to_string())).collect(),
        ))
    }

    fn stringify(&self, value: &Value) -> Result<String> {
        let lines = value
            .as_array()
            .context("lines codec expects an array of strings")?;
        let mut buf = String::new();
        for line in lines {
            let line = line
                .as_str()
                .context("lines codec expects an array of strings")?;
            buf.push_str(line);
            buf.push('\n');
        }
        Ok(buf)
    }

    fn empty(&self) -> Value {
        Value::Array(Vec::new())
    }
}

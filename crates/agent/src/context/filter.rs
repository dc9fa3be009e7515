//! Shaping of prior step outputs before they enter a step's context.
//!
//! Transforms run first, in order; then the include list (when non-empty)
//! keeps only the named dot paths; then the exclude list removes paths.

use foreman_core::chain::lookup_path;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One reshaping operation on a step output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OutputTransform {
    /// Move the value at `from` to `to`.
    Rename { from: String, to: String },
    /// Replace the whole output with the value at `path` (null if absent).
    Extract { path: String },
    /// Cut the string at `path` down to `max_chars` characters.
    Truncate { path: String, max_chars: usize },
}

/// Per-step filter over prior outputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputFilter {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub transforms: Vec<OutputTransform>,
}

impl OutputFilter {
    pub fn is_passthrough(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty() && self.transforms.is_empty()
    }

    pub fn apply(&self, output: &Value) -> Value {
        if self.is_passthrough() {
            return output.clone();
        }

        let mut value = output.clone();
        for transform in &self.transforms {
            value = transform.apply(value);
        }

        if !self.include.is_empty() && value.is_object() {
            let mut kept = Map::new();
            for path in &self.include {
                if let Some(found) = lookup_path(&value, path) {
                    set_path(&mut kept, path, found.clone());
                }
            }
            value = Value::Object(kept);
        }

        if let Value::Object(map) = &mut value {
            for path in &self.exclude {
                remove_path(map, path);
            }
        }

        value
    }
}

impl OutputTransform {
    fn apply(&self, value: Value) -> Value {
        match self {
            Self::Rename { from, to } => {
                let Value::Object(mut map) = value else {
                    return value;
                };
                if let Some(moved) = remove_path(&mut map, from) {
                    set_path(&mut map, to, moved);
                }
                Value::Object(map)
            }
            Self::Extract { path } => lookup_path(&value, path).cloned().unwrap_or(Value::Null),
            Self::Truncate { path, max_chars } => {
                let shortened = lookup_path(&value, path)
                    .and_then(Value::as_str)
                    .filter(|s| s.chars().count() > *max_chars)
                    .map(|s| s.chars().take(*max_chars).collect::<String>());
                match (shortened, value) {
                    (Some(short), Value::Object(mut map)) => {
                        set_path(&mut map, path, Value::String(short));
                        Value::Object(map)
                    }
                    (_, value) => value,
                }
            }
        }
    }
}

/// Write `value` at a dot path, creating intermediate objects.
fn set_path(map: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            map.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(child) = child {
                set_path(child, rest, value);
            }
        }
    }
}

/// Remove and return the value at a dot path.
fn remove_path(map: &mut Map<String, Value>, path: &str) -> Option<Value> {
    match path.split_once('.') {
        None => map.remove(path),
        Some((head, rest)) => match map.get_mut(head) {
            Some(Value::Object(child)) => remove_path(child, rest),
            _ => None,
        },
    }
}

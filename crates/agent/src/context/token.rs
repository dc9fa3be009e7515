//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token. Characters
//! are Unicode scalar values, not bytes.

use serde_json::Value;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.chars().count().div_ceil(4)
}

/// Estimate tokens for a JSON payload as it would be serialized.
///
/// `null` and empty objects count as nothing.
pub fn estimate_value_tokens(value: &Value) -> usize {
    match value {
        Value::Null => 0,
        Value::Object(map) if map.is_empty() => 0,
        other => estimate_tokens(&other.to_string()),
    }
}

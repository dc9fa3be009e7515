//! Chain context: the accumulated state of one chain run.
//!
//! A [`ChainContext`] is a value: every update returns a new context that the
//! caller persists. It holds each executed step's output keyed by step
//! index, the order those outputs were recorded in, the accumulated payload
//! seeded at chain start, and chain metadata (chain name, pause/resume
//! annotations, parallel group aggregates).
//!
//! "Last" always means most recently recorded, not highest index: a `goto`
//! back to an earlier step makes that step the last one again.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainContext {
    #[serde(default)]
    pub step_outputs: BTreeMap<usize, Value>,

    /// Step indices in the order their outputs were recorded, each at most
    /// once, most recent at the end.
    #[serde(default)]
    pub execution_order: Vec<usize>,

    #[serde(default)]
    pub accumulated: Value,

    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ChainContext {
    pub fn new(accumulated: Value) -> Self {
        Self {
            step_outputs: BTreeMap::new(),
            execution_order: Vec::new(),
            accumulated,
            metadata: Map::new(),
        }
    }

    pub fn with_step_output(&self, index: usize, output: Value) -> Self {
        let mut next = self.clone();
        next.step_outputs.insert(index, output);
        next.execution_order.retain(|&i| i != index);
        next.execution_order.push(index);
        next
    }

    /// Shallow-merge `extra` into the metadata; later keys win.
    pub fn with_metadata(&self, extra: Map<String, Value>) -> Self {
        let mut next = self.clone();
        next.metadata.extend(extra);
        next
    }

    pub fn with_pause(&self, reason: &str) -> Self {
        let mut extra = Map::new();
        extra.insert("pause_reason".into(), Value::String(reason.to_string()));
        extra.insert("paused_at".into(), Value::String(Utc::now().to_rfc3339()));
        self.with_metadata(extra)
    }

    pub fn with_resume(&self, data: Value) -> Self {
        let mut extra = Map::new();
        extra.insert("resume_data".into(), data);
        extra.insert("resumed_at".into(), Value::String(Utc::now().to_rfc3339()));
        let mut next = self.with_metadata(extra);
        next.metadata.remove("pause_reason");
        next
    }

    pub fn output(&self, index: usize) -> Option<&Value> {
        self.step_outputs.get(&index)
    }

    /// Index of the most recently recorded step.
    pub fn last_index(&self) -> Option<usize> {
        self.execution_order
            .last()
            .copied()
            .or_else(|| self.step_outputs.keys().next_back().copied())
    }

    /// Output of the most recently recorded step.
    pub fn last_output(&self) -> Option<&Value> {
        self.last_index().and_then(|index| self.step_outputs.get(&index))
    }

    /// Step outputs, most recently recorded first.
    ///
    /// Contexts persisted without an execution order fall back to
    /// descending index order.
    pub fn outputs_by_recency(&self) -> Vec<(usize, &Value)> {
        let mut ordered: Vec<(usize, &Value)> = self
            .execution_order
            .iter()
            .rev()
            .filter_map(|&index| self.step_outputs.get(&index).map(|output| (index, output)))
            .collect();
        for (&index, output) in self.step_outputs.iter().rev() {
            if !self.execution_order.contains(&index) {
                ordered.push((index, output));
            }
        }
        ordered
    }

    /// Every step output keyed by its index, as a JSON object.
    pub fn all_outputs(&self) -> Map<String, Value> {
        self.step_outputs
            .iter()
            .map(|(index, output)| (index.to_string(), output.clone()))
            .collect()
    }

    /// The document conditions are evaluated against:
    /// `{steps, last, accumulated, metadata}`.
    pub fn snapshot(&self) -> Value {
        serde_json::json!({
            "steps": Value::Object(self.all_outputs()),
            "last": self.last_output().cloned().unwrap_or(Value::Null),
            "accumulated": self.accumulated,
            "metadata": Value::Object(self.metadata.clone()),
        })
    }

    pub fn evaluate(&self, condition: &Condition, evaluator: &dyn ConditionEvaluator) -> bool {
        evaluator.evaluate(condition, &self.snapshot())
    }
}

// ── Conditions ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    Exists,
    NotExists,
    Truthy,
}

/// A predicate over the chain snapshot, e.g. `last.approved eq true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Dot-separated path into the snapshot, e.g. `steps.0.score`.
    pub path: String,
    pub op: ConditionOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Condition {
    pub fn new(path: impl Into<String>, op: ConditionOp, value: Option<Value>) -> Self {
        Self {
            path: path.into(),
            op,
            value,
        }
    }

    pub fn equals(path: impl Into<String>, value: Value) -> Self {
        Self::new(path, ConditionOp::Eq, Some(value))
    }

    pub fn truthy(path: impl Into<String>) -> Self {
        Self::new(path, ConditionOp::Truthy, None)
    }
}

/// Evaluates a [`Condition`] against a context snapshot.
pub trait ConditionEvaluator: Send + Sync {
    fn evaluate(&self, condition: &Condition, snapshot: &Value) -> bool;
}

/// The built-in evaluator: resolves the path and applies the operator.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathEvaluator;

impl ConditionEvaluator for PathEvaluator {
    fn evaluate(&self, condition: &Condition, snapshot: &Value) -> bool {
        let found = lookup_path(snapshot, &condition.path);
        let expected = condition.value.as_ref().unwrap_or(&Value::Null);
        match condition.op {
            ConditionOp::Exists => found.is_some_and(|v| !v.is_null()),
            ConditionOp::NotExists => found.is_none_or(Value::is_null),
            ConditionOp::Truthy => found.is_some_and(is_truthy),
            ConditionOp::Eq => found.unwrap_or(&Value::Null) == expected,
            ConditionOp::Ne => found.unwrap_or(&Value::Null) != expected,
            ConditionOp::Gt => compare(found, expected).is_some_and(|o| o.is_gt()),
            ConditionOp::Gte => compare(found, expected).is_some_and(|o| o.is_ge()),
            ConditionOp::Lt => compare(found, expected).is_some_and(|o| o.is_lt()),
            ConditionOp::Lte => compare(found, expected).is_some_and(|o| o.is_le()),
            ConditionOp::Contains => match found {
                Some(Value::String(s)) => expected.as_str().is_some_and(|needle| s.contains(needle)),
                Some(Value::Array(items)) => items.contains(expected),
                Some(Value::Object(map)) => expected.as_str().is_some_and(|k| map.contains_key(k)),
                _ => false,
            },
        }
    }
}

/// Resolve a dot-separated path. Numeric segments index into arrays.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn compare(found: Option<&Value>, expected: &Value) -> Option<std::cmp::Ordering> {
    match (found?, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

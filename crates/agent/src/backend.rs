//! Agent execution backend: the seam to whatever actually produces an
//! agent's output (a language model, a rules engine, a canned script).

use crate::context::AgentContext;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use thiserror::Error;

/// What one agent execution produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub content: Value,
    /// Tokens consumed, as reported by the backend.
    #[serde(default)]
    pub tokens: u64,
    /// Cost in USD.
    #[serde(default)]
    pub cost: f64,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Agent execution failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait AgentBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Run one workflow kind over an assembled context and step input.
    async fn execute(
        &self,
        workflow_kind: &str,
        context: &AgentContext,
        input: &Value,
    ) -> Result<AgentOutput, BackendError>;
}

/// Deterministic backend for demos and tests.
///
/// Returns the canned response registered for a workflow kind, or echoes
/// the input. Tokens are the context estimate; cost is priced per 1K
/// tokens.
#[derive(Debug, Clone, Default)]
pub struct EchoBackend {
    responses: HashMap<String, Value>,
    cost_per_1k_tokens: f64,
}

impl EchoBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(mut self, workflow_kind: impl Into<String>, content: Value) -> Self {
        self.responses.insert(workflow_kind.into(), content);
        self
    }

    pub fn with_cost_per_1k_tokens(mut self, price: f64) -> Self {
        self.cost_per_1k_tokens = price;
        self
    }
}

#[async_trait]
impl AgentBackend for EchoBackend {
    fn name(&self) -> &str {
        "echo"
    }

    async fn execute(
        &self,
        workflow_kind: &str,
        context: &AgentContext,
        input: &Value,
    ) -> Result<AgentOutput, BackendError> {
        let content = self
            .responses
            .get(workflow_kind)
            .cloned()
            .unwrap_or_else(|| json!({ "workflow_kind": workflow_kind, "input": input }));
        let tokens = context.estimated_tokens() as u64;
        Ok(AgentOutput {
            content,
            tokens,
            cost: tokens as f64 / 1000.0 * self.cost_per_1k_tokens,
        })
    }
}

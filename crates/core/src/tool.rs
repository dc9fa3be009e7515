//! Tool trait — the abstraction over side-effecting agent capabilities.
//!
//! Tools never authorize themselves. Every invocation goes through the tool
//! gateway, which has already checked permission, budget and approval
//! requirements by the time `execute` is called.

use crate::error::ToolError;
use crate::ids::{AgentId, TeamId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Who a tool is running on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolContext {
    pub team_id: TeamId,
    pub agent_id: AgentId,
}

/// Outcome class of a gateway-mediated invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    Failure,
    Denied,
}

impl std::fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Denied => write!(f, "denied"),
        }
    }
}

/// The result of one tool invocation. Produced for every attempt, denials included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_name: String,
    pub status: ToolStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub duration_ms: u64,
}

impl ToolResult {
    pub fn success(tool_name: impl Into<String>, data: serde_json::Value, duration_ms: u64) -> Self {
        Self {
            tool_name: tool_name.into(),
            status: ToolStatus::Success,
            data: Some(data),
            error: None,
            duration_ms,
        }
    }

    pub fn failure(tool_name: impl Into<String>, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            tool_name: tool_name.into(),
            status: ToolStatus::Failure,
            data: None,
            error: Some(error.into()),
            duration_ms,
        }
    }

    pub fn denied(tool_name: impl Into<String>, reason: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            tool_name: tool_name.into(),
            status: ToolStatus::Denied,
            data: None,
            error: Some(reason.into()),
            duration_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }

    pub fn is_denied(&self) -> bool {
        self.status == ToolStatus::Denied
    }
}

/// The core Tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "remember", "create_task").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// Declared category, e.g. "tasks" or "communications". Drives the
    /// permission and approval mappings.
    fn category(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given parameters.
    async fn execute(
        &self,
        context: &ToolContext,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError>;
}

/// A registry of available tools, keyed by name.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

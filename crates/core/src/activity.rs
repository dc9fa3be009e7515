//! Activity log: the append-only audit and reconciliation record.
//!
//! Every agent run, chain step and tool invocation appends exactly one
//! record. The core writes these and never reads them back.

use crate::ids::{AgentId, ChainRunId, TeamId, WorkflowRunId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    AgentRun,
    ChainStep,
    ToolInvocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Success,
    Failure,
    Denied,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub kind: ActivityKind,
    pub status: ActivityStatus,
    pub team_id: TeamId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_run_id: Option<WorkflowRunId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_run_id: Option<ChainRunId>,

    /// Tool name, workflow kind, or step name.
    pub subject: String,

    pub input: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default)]
    pub cost: f64,

    #[serde(default)]
    pub tokens: u64,

    pub duration_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

impl ActivityRecord {
    pub fn new(
        kind: ActivityKind,
        status: ActivityStatus,
        team_id: TeamId,
        subject: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            status,
            team_id,
            agent_id: None,
            workflow_run_id: None,
            chain_run_id: None,
            subject: subject.into(),
            input,
            output: None,
            error: None,
            cost: 0.0,
            tokens: 0,
            duration_ms: 0,
            recorded_at: Utc::now(),
        }
    }

    pub fn agent(mut self, agent_id: AgentId) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    pub fn workflow_run(mut self, id: WorkflowRunId) -> Self {
        self.workflow_run_id = Some(id);
        self
    }

    pub fn chain_run(mut self, id: ChainRunId) -> Self {
        self.chain_run_id = Some(id);
        self
    }

    pub fn output(mut self, output: serde_json::Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn usage(mut self, cost: f64, tokens: u64) -> Self {
        self.cost = cost;
        self.tokens = tokens;
        self
    }

    pub fn duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

/// Where activity records are written.
///
/// Appends must not fail the caller: implementations log their own
/// delivery problems.
#[async_trait]
pub trait ActivitySink: Send + Sync {
    async fn append(&self, record: ActivityRecord);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_optional_fields() {
        let run = ChainRunId::new();
        let record = ActivityRecord::new(
            ActivityKind::ChainStep,
            ActivityStatus::Failure,
            TeamId::new(),
            "draft_update",
            serde_json::json!({"step": 0}),
        )
        .chain_run(run)
        .error("backend unavailable")
        .usage(0.25, 1200)
        .duration_ms(40);

        assert_eq!(record.chain_run_id, Some(run));
        assert_eq!(record.error.as_deref(), Some("backend unavailable"));
        assert_eq!(record.tokens, 1200);
        assert_eq!(record.duration_ms, 40);
    }

    #[test]
    fn record_serializes_snake_case() {
        let record = ActivityRecord::new(
            ActivityKind::ToolInvocation,
            ActivityStatus::Denied,
            TeamId::new(),
            "send_email",
            serde_json::json!({}),
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "tool_invocation");
        assert_eq!(json["status"], "denied");
        assert!(json.get("output").is_none());
    }
}

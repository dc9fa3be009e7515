//! Workflow runs and their namespaced state bag.

use chrono::{DateTime, Utc};
use foreman_core::ids::{AgentId, TeamId, WorkflowRunId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const START_NODE: &str = "start";
pub const COMPLETED_NODE: &str = "completed";

/// Durable state of a workflow run.
///
/// Each namespace has one writer: `input` is fixed at start,
/// `customization` is stashed at start, `approval` is merged by resume,
/// `result` by complete, and `data` by node updates. `version` counts merges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateBag {
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customization: Option<Value>,
    #[serde(default)]
    pub approval: Map<String, Value>,
    #[serde(default)]
    pub result: Map<String, Value>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl StateBag {
    pub fn new(input: Value, customization: Option<Value>) -> Self {
        Self {
            input,
            customization,
            ..Self::default()
        }
    }

    pub fn merge_approval(&mut self, value: Value) {
        merge(&mut self.approval, value);
        self.version += 1;
    }

    pub fn merge_result(&mut self, value: Value) {
        merge(&mut self.result, value);
        self.version += 1;
    }

    pub fn merge_data(&mut self, extra: Map<String, Value>) {
        self.data.extend(extra);
        self.version += 1;
    }
}

/// Objects are merged key by key; any other value lands under `"value"`.
fn merge(target: &mut Map<String, Value>, value: Value) {
    match value {
        Value::Object(map) => target.extend(map),
        Value::Null => {}
        other => {
            target.insert("value".into(), other);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Active,
    AwaitingApproval,
    Completed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Completed => "completed",
        }
    }
}

/// One execution of a single-agent workflow kind. Never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: WorkflowRunId,
    pub team_id: TeamId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
    pub kind: String,
    /// Free-text checkpoint label.
    pub current_node: String,
    pub state: StateBag,
    #[serde(default)]
    pub approval_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRun {
    pub fn new(
        team_id: TeamId,
        agent_id: Option<AgentId>,
        kind: impl Into<String>,
        state: StateBag,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: WorkflowRunId::new(),
            team_id,
            agent_id,
            kind: kind.into(),
            current_node: START_NODE.into(),
            state,
            approval_required: false,
            pause_reason: None,
            paused_at: None,
            resumed_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> WorkflowStatus {
        if self.completed_at.is_some() {
            WorkflowStatus::Completed
        } else if self.paused_at.is_some() {
            WorkflowStatus::AwaitingApproval
        } else {
            WorkflowStatus::Active
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status() == WorkflowStatus::Completed
    }

    pub fn is_paused(&self) -> bool {
        self.status() == WorkflowStatus::AwaitingApproval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merges_bump_the_version() {
        let mut bag = StateBag::new(json!({"project_id": "p"}), None);
        bag.merge_approval(json!({"approved": true}));
        bag.merge_result(json!("done"));
        bag.merge_data(Map::new());
        assert_eq!(bag.version, 3);
        assert_eq!(bag.approval["approved"], true);
        assert_eq!(bag.result["value"], "done");
    }

    #[test]
    fn status_follows_timestamps() {
        let mut run = WorkflowRun::new(TeamId::new(), None, "status_report", StateBag::default());
        assert_eq!(run.status(), WorkflowStatus::Active);
        assert_eq!(run.current_node, START_NODE);
        run.paused_at = Some(Utc::now());
        assert!(run.is_paused());
        run.completed_at = Some(Utc::now());
        assert!(run.is_completed());
    }
}

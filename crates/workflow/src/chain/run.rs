//! Chain runs and their per-step records.

use chrono::{DateTime, Utc};
use foreman_core::chain::ChainContext;
use foreman_core::entity::EntityRef;
use foreman_core::ids::{ChainRunId, StepRecordId, TeamId, WorkflowRunId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStatus {
    Running,
    Paused,
    Completed,
    Failed,
}

impl ChainStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainRun {
    pub id: ChainRunId,
    pub team_id: TeamId,
    /// Name of the chain definition.
    pub chain: String,
    pub current_step_index: usize,
    pub status: ChainStatus,
    pub context: ChainContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<EntityRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ChainRun {
    pub fn new(
        team_id: TeamId,
        chain: impl Into<String>,
        context: ChainContext,
        trigger: Option<EntityRef>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ChainRunId::new(),
            team_id,
            chain: chain.into(),
            current_step_index: 0,
            status: ChainStatus::Running,
            context,
            trigger,
            error: None,
            started_at: now,
            paused_at: None,
            resumed_at: None,
            completed_at: None,
            failed_at: None,
            updated_at: now,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == ChainStatus::Running
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// What happened to one step of one chain run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainStepRecord {
    pub id: StepRecordId,
    pub chain_run_id: ChainRunId,
    pub step_index: usize,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_run_id: Option<WorkflowRunId>,
}

impl ChainStepRecord {
    fn with_status(chain_run_id: ChainRunId, step_index: usize, status: StepStatus) -> Self {
        Self {
            id: StepRecordId::new(),
            chain_run_id,
            step_index,
            status,
            started_at: None,
            completed_at: None,
            output: None,
            error: None,
            workflow_run_id: None,
        }
    }

    pub fn running(chain_run_id: ChainRunId, step_index: usize) -> Self {
        let mut record = Self::with_status(chain_run_id, step_index, StepStatus::Running);
        record.started_at = Some(Utc::now());
        record
    }

    pub fn pending(chain_run_id: ChainRunId, step_index: usize) -> Self {
        Self::with_status(chain_run_id, step_index, StepStatus::Pending)
    }

    /// A record that never ran, created to carry a failure.
    pub fn failed(chain_run_id: ChainRunId, step_index: usize, error: impl Into<String>) -> Self {
        let mut record = Self::with_status(chain_run_id, step_index, StepStatus::Failed);
        record.completed_at = Some(Utc::now());
        record.error = Some(error.into());
        record
    }

    pub fn start(&mut self) {
        self.status = StepStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn complete(&mut self, output: Value) {
        self.status = StepStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.output = Some(output);
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error.into());
    }
}

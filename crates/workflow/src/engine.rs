//! Workflow engine: durable bookkeeping of single-agent workflow runs.
//!
//! Transitions:
//!
//! - `start` creates a run at node `start`, stashing the team's enabled
//!   customization for the kind
//! - `pause` marks the run as awaiting approval
//! - `resume` merges approval data and clears the pause
//! - `complete` merges the result and moves to node `completed`
//! - `update_node` advances the checkpoint label and merges extra data
//!
//! Each transition is one atomic read-modify-write plus an audit entry.
//! Transitions on a completed run are no-ops.

use crate::customization::CustomizationSource;
use crate::run::{COMPLETED_NODE, StateBag, WorkflowRun};
use crate::store::{RunStore, Updated};
use chrono::Utc;
use foreman_config::AppConfig;
use foreman_core::error::{Error, Result, StoreError, WorkflowError};
use foreman_core::ids::{AgentId, TeamId, WorkflowRunId};
use foreman_security::audit::{AuditEvent, AuditLogger, AuditOutcome};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

pub struct WorkflowEngine {
    store: Arc<dyn RunStore>,
    customizations: Arc<dyn CustomizationSource>,
    audit: Arc<AuditLogger>,
    /// Workflow kind → input keys `start` insists on.
    required_input: BTreeMap<String, Vec<String>>,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn RunStore>,
        customizations: Arc<dyn CustomizationSource>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            store,
            customizations,
            audit,
            required_input: BTreeMap::new(),
        }
    }

    /// Enforce the per-kind input keys from configuration.
    pub fn with_config(mut self, config: &AppConfig) -> Self {
        self.required_input = config
            .workflows
            .iter()
            .map(|w| (w.kind.clone(), w.required_input.clone()))
            .collect();
        self
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    pub async fn get(&self, id: WorkflowRunId) -> Result<WorkflowRun> {
        self.store
            .workflow_run(id)
            .await?
            .ok_or_else(|| Error::Store(StoreError::not_found("workflow run", id)))
    }

    pub async fn start(
        &self,
        kind: &str,
        input: Value,
        team_id: TeamId,
        agent_id: Option<AgentId>,
    ) -> Result<WorkflowRun> {
        self.validate_input(kind, &input)?;

        let customization = self
            .customizations
            .customization(team_id, kind)
            .await?
            .filter(|c| c.enabled)
            .map(|c| c.settings);

        let run = WorkflowRun::new(team_id, agent_id, kind, StateBag::new(input, customization));
        self.store.insert_workflow_run(&run).await?;

        info!(run = %run.id, kind, team = %team_id, "Workflow started");
        self.audit.log(
            AuditEvent::WorkflowStarted { kind: kind.into() },
            &team_id.to_string(),
            &run.id.to_string(),
            AuditOutcome::Success,
            None,
        );
        Ok(run)
    }

    pub async fn pause(&self, id: WorkflowRunId, reason: &str) -> Result<WorkflowRun> {
        let reason_owned = reason.to_string();
        let updated = self
            .store
            .update_workflow_run(
                id,
                Box::new(move |run| {
                    if run.is_completed() {
                        return false;
                    }
                    let now = Utc::now();
                    run.paused_at = Some(now);
                    run.pause_reason = Some(reason_owned);
                    run.approval_required = true;
                    run.updated_at = now;
                    true
                }),
            )
            .await?;
        Ok(self.record(updated, AuditEvent::WorkflowPaused, Some(reason.into())))
    }

    pub async fn resume(&self, id: WorkflowRunId, approval: Value) -> Result<WorkflowRun> {
        let updated = self
            .store
            .update_workflow_run(
                id,
                Box::new(move |run| {
                    if run.is_completed() {
                        return false;
                    }
                    let now = Utc::now();
                    run.state.merge_approval(approval);
                    run.paused_at = None;
                    run.pause_reason = None;
                    run.approval_required = false;
                    run.resumed_at = Some(now);
                    run.updated_at = now;
                    true
                }),
            )
            .await?;
        Ok(self.record(updated, AuditEvent::WorkflowResumed, None))
    }

    pub async fn complete(&self, id: WorkflowRunId, result: Value) -> Result<WorkflowRun> {
        let updated = self
            .store
            .update_workflow_run(
                id,
                Box::new(move |run| {
                    if run.is_completed() {
                        return false;
                    }
                    let now = Utc::now();
                    run.state.merge_result(result);
                    run.current_node = COMPLETED_NODE.into();
                    run.completed_at = Some(now);
                    run.updated_at = now;
                    true
                }),
            )
            .await?;
        Ok(self.record(updated, AuditEvent::WorkflowCompleted, None))
    }

    pub async fn update_node(
        &self,
        id: WorkflowRunId,
        node: &str,
        extra: Map<String, Value>,
    ) -> Result<WorkflowRun> {
        let node_owned = node.to_string();
        let updated = self
            .store
            .update_workflow_run(
                id,
                Box::new(move |run| {
                    if run.is_completed() {
                        return false;
                    }
                    run.current_node = node_owned;
                    run.state.merge_data(extra);
                    run.updated_at = Utc::now();
                    true
                }),
            )
            .await?;
        Ok(self.record(
            updated,
            AuditEvent::WorkflowNodeUpdated { node: node.into() },
            None,
        ))
    }

    fn validate_input(&self, kind: &str, input: &Value) -> Result<()> {
        let Some(required) = self.required_input.get(kind) else {
            return Ok(());
        };
        for key in required {
            if input.get(key).is_none_or(Value::is_null) {
                return Err(WorkflowError::InvalidInput {
                    kind: kind.into(),
                    reason: format!("missing '{key}'"),
                }
                .into());
            }
        }
        Ok(())
    }

    fn record(
        &self,
        updated: Updated<WorkflowRun>,
        event: AuditEvent,
        details: Option<String>,
    ) -> WorkflowRun {
        let run = updated.value;
        let outcome = if updated.changed {
            info!(run = %run.id, event = ?event, node = %run.current_node, "Workflow transition");
            AuditOutcome::Success
        } else {
            debug!(run = %run.id, event = ?event, "Workflow already completed; transition skipped");
            AuditOutcome::Skipped
        };
        self.audit.log(
            event,
            &run.team_id.to_string(),
            &run.id.to_string(),
            outcome,
            details,
        );
        run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::customization::{StaticCustomizations, WorkflowCustomization};
    use crate::run::{START_NODE, WorkflowStatus};
    use crate::store::InMemoryRunStore;
    use foreman_config::WorkflowKindConfig;
    use foreman_core::ids::CustomizationId;
    use serde_json::json;

    struct Harness {
        engine: WorkflowEngine,
        customizations: Arc<StaticCustomizations>,
        audit: Arc<AuditLogger>,
        team: TeamId,
    }

    fn harness() -> Harness {
        let customizations = Arc::new(StaticCustomizations::new());
        let audit = Arc::new(AuditLogger::new());
        let mut config = AppConfig::default();
        config.workflows.push(WorkflowKindConfig {
            kind: "status_report".into(),
            required_input: vec!["project_id".into()],
        });
        let engine = WorkflowEngine::new(
            Arc::new(InMemoryRunStore::new()),
            customizations.clone(),
            audit.clone(),
        )
        .with_config(&config);
        Harness {
            engine,
            customizations,
            audit,
            team: TeamId::new(),
        }
    }

    #[tokio::test]
    async fn start_stashes_enabled_customization() {
        let h = harness();
        h.customizations.insert(WorkflowCustomization {
            id: CustomizationId::new(),
            team_id: h.team,
            kind: "status_report".into(),
            enabled: true,
            settings: json!({"tone": "brief"}),
        });

        let run = h
            .engine
            .start("status_report", json!({"project_id": "p-1"}), h.team, None)
            .await
            .unwrap();
        assert_eq!(run.current_node, START_NODE);
        assert_eq!(run.state.customization, Some(json!({"tone": "brief"})));
        assert_eq!(run.state.input["project_id"], "p-1");
    }

    #[tokio::test]
    async fn disabled_customization_is_ignored() {
        let h = harness();
        h.customizations.insert(WorkflowCustomization {
            id: CustomizationId::new(),
            team_id: h.team,
            kind: "triage".into(),
            enabled: false,
            settings: json!({"x": 1}),
        });
        let run = h.engine.start("triage", json!({}), h.team, None).await.unwrap();
        assert!(run.state.customization.is_none());
    }

    #[tokio::test]
    async fn start_rejects_missing_required_input() {
        let h = harness();
        let err = h
            .engine
            .start("status_report", json!({"week": 3}), h.team, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Workflow(WorkflowError::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn pause_resume_complete_lifecycle() {
        let h = harness();
        let run = h.engine.start("triage", json!({}), h.team, None).await.unwrap();

        let paused = h.engine.pause(run.id, "needs sign-off").await.unwrap();
        assert_eq!(paused.status(), WorkflowStatus::AwaitingApproval);
        assert!(paused.approval_required);

        let resumed = h
            .engine
            .resume(run.id, json!({"approved_by": "dana"}))
            .await
            .unwrap();
        assert_eq!(resumed.status(), WorkflowStatus::Active);
        assert!(resumed.pause_reason.is_none());
        assert!(resumed.resumed_at.is_some());
        assert_eq!(resumed.state.approval["approved_by"], "dana");

        let node = h
            .engine
            .update_node(run.id, "drafted", Map::from_iter([("draft".to_string(), json!("v1"))]))
            .await
            .unwrap();
        assert_eq!(node.current_node, "drafted");
        assert_eq!(node.state.data["draft"], "v1");

        let done = h.engine.complete(run.id, json!({"summary": "ok"})).await.unwrap();
        assert_eq!(done.current_node, COMPLETED_NODE);
        assert_eq!(done.state.result["summary"], "ok");
        assert_eq!(done.state.version, 3);
    }

    #[tokio::test]
    async fn completed_run_ignores_further_transitions() {
        let h = harness();
        let run = h.engine.start("triage", json!({}), h.team, None).await.unwrap();
        let done = h.engine.complete(run.id, json!({"n": 1})).await.unwrap();

        let again = h.engine.complete(run.id, json!({"n": 2})).await.unwrap();
        let paused = h.engine.pause(run.id, "late").await.unwrap();
        assert_eq!(again, done);
        assert_eq!(paused, done);

        let skipped = h.audit.entries_by_outcome(&AuditOutcome::Skipped);
        assert_eq!(skipped.len(), 2);
    }

    #[tokio::test]
    async fn unknown_run_propagates_not_found() {
        let h = harness();
        let err = h
            .engine
            .pause(WorkflowRunId::new(), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::NotFound { .. })));
    }
}

//! Agent runner: one budgeted, logged agent execution.
//!
//! Order: budget pre-check against the estimated cost, backend call, cost
//! deduction of what the backend reports, activity record. Budget denials
//! and backend errors come back as outcomes, never as `Err`.

use crate::backend::{AgentBackend, AgentOutput};
use crate::context::AgentContext;
use foreman_core::activity::{ActivityKind, ActivityRecord, ActivitySink, ActivityStatus};
use foreman_core::agent::AgentConfiguration;
use foreman_core::ids::{ChainRunId, WorkflowRunId};
use foreman_telemetry::ledger::BudgetLedger;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Everything one run needs.
pub struct AgentRunRequest<'a> {
    pub configuration: &'a AgentConfiguration,
    pub workflow_kind: &'a str,
    pub context: &'a AgentContext,
    pub input: &'a Value,
    pub estimated_cost: f64,
    pub workflow_run_id: Option<WorkflowRunId>,
    pub chain_run_id: Option<ChainRunId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(AgentOutput),
    BudgetDenied { reason: String },
    Failed { error: String },
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

pub struct AgentRunner {
    backend: Arc<dyn AgentBackend>,
    ledger: Option<Arc<dyn BudgetLedger>>,
    activity: Arc<dyn ActivitySink>,
}

impl AgentRunner {
    pub fn new(backend: Arc<dyn AgentBackend>, activity: Arc<dyn ActivitySink>) -> Self {
        Self {
            backend,
            ledger: None,
            activity,
        }
    }

    /// Enable budget checks and deductions.
    pub fn with_ledger(mut self, ledger: Arc<dyn BudgetLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub async fn run(&self, request: AgentRunRequest<'_>) -> RunOutcome {
        let started = Instant::now();
        let outcome = self.check_and_execute(&request).await;

        let configuration = request.configuration;
        let (status, cost, tokens) = match &outcome {
            RunOutcome::Completed(output) => (ActivityStatus::Success, output.cost, output.tokens),
            RunOutcome::BudgetDenied { .. } => (ActivityStatus::Denied, 0.0, 0),
            RunOutcome::Failed { .. } => (ActivityStatus::Failure, 0.0, 0),
        };
        let mut record = ActivityRecord::new(
            ActivityKind::AgentRun,
            status,
            configuration.team_id,
            request.workflow_kind,
            request.input.clone(),
        )
        .agent(configuration.agent_id)
        .usage(cost, tokens)
        .duration_ms(started.elapsed().as_millis() as u64);
        if let Some(id) = request.workflow_run_id {
            record = record.workflow_run(id);
        }
        if let Some(id) = request.chain_run_id {
            record = record.chain_run(id);
        }
        record = match &outcome {
            RunOutcome::Completed(output) => record.output(output.content.clone()),
            RunOutcome::BudgetDenied { reason } => record.error(reason.clone()),
            RunOutcome::Failed { error } => record.error(error.clone()),
        };
        self.activity.append(record).await;

        outcome
    }

    async fn check_and_execute(&self, request: &AgentRunRequest<'_>) -> RunOutcome {
        let configuration = request.configuration;

        if let Some(ledger) = &self.ledger
            && request.estimated_cost > 0.0
        {
            match ledger
                .denial_reason(configuration.id, request.estimated_cost)
                .await
            {
                Ok(None) => {}
                Ok(Some(reason)) => {
                    warn!(agent = %configuration.agent_id, kind = request.workflow_kind, %reason, "Agent run denied: budget");
                    return RunOutcome::BudgetDenied { reason };
                }
                Err(e) => {
                    error!(agent = %configuration.agent_id, error = %e, "Budget check failed");
                    return RunOutcome::Failed {
                        error: format!("Budget check failed: {e}"),
                    };
                }
            }
        }

        let output = match self
            .backend
            .execute(request.workflow_kind, request.context, request.input)
            .await
        {
            Ok(output) => output,
            Err(e) => {
                error!(
                    agent = %configuration.agent_id,
                    backend = self.backend.name(),
                    kind = request.workflow_kind,
                    error = %e,
                    "Agent execution failed"
                );
                return RunOutcome::Failed { error: e.to_string() };
            }
        };

        if let Some(ledger) = &self.ledger
            && output.cost > 0.0
            && let Err(e) = ledger.deduct_cost(configuration.id, output.cost).await
        {
            error!(agent = %configuration.agent_id, error = %e, "Deducting agent cost failed");
        }

        info!(
            agent = %configuration.agent_id,
            kind = request.workflow_kind,
            tokens = output.tokens,
            cost = output.cost,
            "Agent run completed"
        );
        RunOutcome::Completed(output)
    }
}

//! Chain engine: runs chain definitions step by step over a shared
//! [`ChainContext`].
//!
//! State machine:
//!
//! ```text
//! Running ──pause──▶ Paused ──resume──▶ Running
//! Running ──complete──▶ Completed
//! Running | Paused ──fail──▶ Failed
//! ```
//!
//! Completed and Failed are terminal; every operation on a terminal run is
//! a no-op that still leaves an audit entry. Both terminal transitions purge
//! the run's chain-scoped memory.

use super::branch::{NextStep, evaluate_next_step};
use super::definition::{ChainCatalog, ChainStep};
use super::queue::{JobBatch, JobQueue, StepJob};
use super::run::{ChainRun, ChainStatus, ChainStepRecord, StepStatus};
use crate::engine::WorkflowEngine;
use crate::store::{RunStore, Updated};
use chrono::Utc;
use foreman_agent::context::{ChainScope, ContextAssembler};
use foreman_agent::runner::{AgentRunRequest, AgentRunner, RunOutcome};
use foreman_config::AppConfig;
use foreman_core::activity::{ActivityKind, ActivityRecord, ActivitySink, ActivityStatus};
use foreman_core::agent::AgentDirectory;
use foreman_core::approval::{
    AiSettingsSource, ApprovalInbox, NewApprovalRequest, StaticAiSettings, Urgency,
};
use foreman_core::chain::{ChainContext, ConditionEvaluator, PathEvaluator};
use foreman_core::entity::{EntityKind, EntityRef};
use foreman_core::error::{Error, Result, StoreError, WorkflowError};
use foreman_core::ids::{ChainRunId, StepRecordId, TeamId, WorkflowRunId};
use foreman_core::memory::{MemoryAddress, MemoryStore};
use foreman_security::approval::{Suggestion, should_auto_approve};
use foreman_security::audit::{AuditEvent, AuditLogger, AuditOutcome};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

const DEFAULT_TOKEN_BUDGET: usize = 4000;

/// What one engine call did to a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The run is not running; nothing happened.
    Idle,
    Advanced { next_index: usize },
    Completed,
    Paused { reason: String },
    Failed { error: String },
    /// A parallel group went out as one batch.
    Dispatched { group: String, jobs: usize },
    /// A parallel group still has unfinished members.
    Waiting { group: String },
}

/// Collaborators of a [`ChainEngine`].
pub struct ChainServices {
    pub catalog: Arc<ChainCatalog>,
    pub workflows: Arc<WorkflowEngine>,
    pub assembler: Arc<ContextAssembler>,
    pub runner: Arc<AgentRunner>,
    pub agents: Arc<dyn AgentDirectory>,
    pub memory: Arc<dyn MemoryStore>,
    pub queue: Arc<dyn JobQueue>,
    pub inbox: Arc<dyn ApprovalInbox>,
    pub activity: Arc<dyn ActivitySink>,
    pub audit: Arc<AuditLogger>,
}

enum StepResult {
    Output(Value),
    BudgetDenied(String),
    Failed(String),
}

pub struct ChainEngine {
    catalog: Arc<ChainCatalog>,
    store: Arc<dyn RunStore>,
    workflows: Arc<WorkflowEngine>,
    assembler: Arc<ContextAssembler>,
    runner: Arc<AgentRunner>,
    agents: Arc<dyn AgentDirectory>,
    memory: Arc<dyn MemoryStore>,
    queue: Arc<dyn JobQueue>,
    inbox: Arc<dyn ApprovalInbox>,
    activity: Arc<dyn ActivitySink>,
    audit: Arc<AuditLogger>,
    evaluator: Arc<dyn ConditionEvaluator>,
    settings: Arc<dyn AiSettingsSource>,
    default_token_budget: usize,
}

impl ChainEngine {
    /// Chain runs share the workflow engine's run store.
    pub fn new(services: ChainServices) -> Self {
        Self {
            store: services.workflows.store().clone(),
            catalog: services.catalog,
            workflows: services.workflows,
            assembler: services.assembler,
            runner: services.runner,
            agents: services.agents,
            memory: services.memory,
            queue: services.queue,
            inbox: services.inbox,
            activity: services.activity,
            audit: services.audit,
            evaluator: Arc::new(PathEvaluator),
            settings: Arc::new(StaticAiSettings::new()),
            default_token_budget: DEFAULT_TOKEN_BUDGET,
        }
    }

    pub fn with_config(mut self, config: &AppConfig) -> Self {
        self.default_token_budget = config.context.default_token_budget;
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Team AI settings consulted for steps that need sign-off.
    pub fn with_ai_settings(mut self, settings: Arc<dyn AiSettingsSource>) -> Self {
        self.settings = settings;
        self
    }

    pub fn catalog(&self) -> &ChainCatalog {
        &self.catalog
    }

    pub async fn get(&self, id: ChainRunId) -> Result<ChainRun> {
        self.store
            .chain_run(id)
            .await?
            .ok_or_else(|| Error::Store(StoreError::not_found("chain run", id)))
    }

    pub async fn step_records(&self, id: ChainRunId) -> Result<Vec<ChainStepRecord>> {
        Ok(self.store.step_records(id).await?)
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────

    /// Create a running chain run at step 0, seeded with `seed`.
    pub async fn start(
        &self,
        chain: &str,
        team_id: TeamId,
        seed: Value,
        trigger: Option<EntityRef>,
    ) -> Result<ChainRun> {
        let definition = self.catalog.get(chain)?;
        let mut metadata = Map::new();
        metadata.insert("chain".into(), json!(definition.name));
        let context = ChainContext::new(seed).with_metadata(metadata);

        let run = ChainRun::new(team_id, &definition.name, context, trigger);
        self.store.insert_chain_run(&run).await?;

        info!(run = %run.id, chain, team = %team_id, steps = definition.steps.len(), "Chain started");
        self.audit.log(
            AuditEvent::ChainStarted {
                chain: chain.into(),
            },
            &team_id.to_string(),
            &run.id.to_string(),
            AuditOutcome::Success,
            None,
        );
        Ok(run)
    }

    pub async fn pause(&self, id: ChainRunId, reason: &str) -> Result<ChainRun> {
        Ok(self.pause_inner(id, reason).await?.value)
    }

    async fn pause_inner(&self, id: ChainRunId, reason: &str) -> Result<Updated<ChainRun>> {
        let reason_owned = reason.to_string();
        let updated = self
            .store
            .update_chain_run(
                id,
                Box::new(move |run| {
                    if run.status != ChainStatus::Running {
                        return false;
                    }
                    let now = Utc::now();
                    run.status = ChainStatus::Paused;
                    run.context = run.context.with_pause(&reason_owned);
                    run.paused_at = Some(now);
                    run.updated_at = now;
                    true
                }),
            )
            .await?;
        self.record(&updated, AuditEvent::ChainPaused, Some(reason.into()));
        Ok(updated)
    }

    /// Resume a paused run with `data`; a paused workflow run behind the
    /// current step is resumed with the same data.
    pub async fn resume(&self, id: ChainRunId, data: Value) -> Result<ChainRun> {
        let resume_data = data.clone();
        let updated = self
            .store
            .update_chain_run(
                id,
                Box::new(move |run| {
                    if run.status != ChainStatus::Paused {
                        return false;
                    }
                    let now = Utc::now();
                    run.status = ChainStatus::Running;
                    run.context = run.context.with_resume(resume_data);
                    run.paused_at = None;
                    run.resumed_at = Some(now);
                    run.updated_at = now;
                    true
                }),
            )
            .await?;
        self.record(&updated, AuditEvent::ChainResumed, None);

        if updated.changed
            && let Some(workflow_id) = self.workflow_run_at(&updated.value, updated.value.current_step_index).await?
        {
            let workflow = self.workflows.get(workflow_id).await?;
            if workflow.is_paused() {
                self.workflows.resume(workflow_id, data).await?;
            }
        }
        Ok(updated.value)
    }

    pub async fn complete(&self, id: ChainRunId) -> Result<ChainRun> {
        self.finish(id, None).await
    }

    async fn finish(&self, id: ChainRunId, context: Option<ChainContext>) -> Result<ChainRun> {
        let updated = self
            .store
            .update_chain_run(
                id,
                Box::new(move |run| {
                    if run.status != ChainStatus::Running {
                        return false;
                    }
                    let now = Utc::now();
                    run.status = ChainStatus::Completed;
                    if let Some(context) = context {
                        run.context = context;
                    }
                    run.completed_at = Some(now);
                    run.updated_at = now;
                    true
                }),
            )
            .await?;
        self.record(&updated, AuditEvent::ChainCompleted, None);
        if updated.changed {
            self.purge_chain_memory(&updated.value).await?;
        }
        Ok(updated.value)
    }

    /// Fail a running or paused run. Unfinished step records are marked
    /// failed; without any, a failed record is created at the current step.
    pub async fn fail(&self, id: ChainRunId, error: &str) -> Result<ChainRun> {
        let error_owned = error.to_string();
        let updated = self
            .store
            .update_chain_run(
                id,
                Box::new(move |run| {
                    if run.status.is_terminal() {
                        return false;
                    }
                    let now = Utc::now();
                    run.status = ChainStatus::Failed;
                    run.error = Some(error_owned);
                    run.failed_at = Some(now);
                    run.updated_at = now;
                    true
                }),
            )
            .await?;
        self.record(&updated, AuditEvent::ChainFailed, Some(error.into()));
        if !updated.changed {
            return Ok(updated.value);
        }

        let run = updated.value;
        let unfinished: Vec<StepRecordId> = self
            .store
            .step_records(id)
            .await?
            .into_iter()
            .filter(|record| !record.status.is_finished())
            .map(|record| record.id)
            .collect();
        if unfinished.is_empty() {
            let record = ChainStepRecord::failed(id, run.current_step_index, error);
            self.store.insert_step_record(&record).await?;
        }
        for record_id in unfinished {
            self.fail_record(record_id, error).await?;
        }

        self.purge_chain_memory(&run).await?;
        Ok(run)
    }

    /// Pause the run and, when the current step started a workflow run,
    /// pause that too and raise an approval request against it.
    pub async fn request_approval(&self, id: ChainRunId, reason: &str) -> Result<ChainRun> {
        let updated = self.pause_inner(id, reason).await?;
        let run = updated.value;
        if updated.changed {
            self.raise_approval(&run, run.current_step_index, reason).await?;
        }
        Ok(run)
    }

    /// Raise an approval request against the workflow run behind
    /// `step_index`, pausing it if it is still open.
    async fn raise_approval(&self, run: &ChainRun, step_index: usize, reason: &str) -> Result<()> {
        let Some(workflow_id) = self.workflow_run_at(run, step_index).await? else {
            debug!(run = %run.id, step_index, "No workflow run behind the step; paused without an approval request");
            return Ok(());
        };

        let workflow = self.workflows.pause(workflow_id, reason).await?;
        let step_name = self
            .catalog
            .get(&run.chain)?
            .step(step_index)?
            .name
            .clone();
        let request = NewApprovalRequest {
            team_id: run.team_id,
            title: format!("Approval needed: {} / {step_name}", run.chain),
            preview: reason.into(),
            content: json!({
                "chain": run.chain,
                "chain_run_id": run.id,
                "step_index": step_index,
                "workflow_kind": workflow.kind,
                "reason": reason,
            }),
            urgency: Urgency::Normal,
            subject: EntityRef::new(EntityKind::WorkflowRun, workflow_id),
        };
        let request_id = self
            .inbox
            .create(request)
            .await
            .map_err(|e| WorkflowError::Approval(e.to_string()))?;

        info!(run = %run.id, workflow = %workflow_id, request = %request_id, "Approval requested");
        self.audit.log(
            AuditEvent::ApprovalRequested,
            &run.team_id.to_string(),
            &run.id.to_string(),
            AuditOutcome::Success,
            Some(format!("request {request_id} for workflow {workflow_id}")),
        );
        Ok(())
    }

    // ── Step execution ────────────────────────────────────────────────────

    /// Execute the current step, then branch, advance or complete.
    pub async fn execute_step(&self, id: ChainRunId) -> Result<StepOutcome> {
        let run = self.get(id).await?;
        if !run.is_running() {
            debug!(run = %id, status = run.status.as_str(), "Chain not running; step skipped");
            return Ok(StepOutcome::Idle);
        }
        let chain = self.catalog.get(&run.chain)?;
        let index = run.current_step_index;
        let step = chain.step(index)?;

        let record = ChainStepRecord::running(id, index);
        self.store.insert_step_record(&record).await?;

        let started = Instant::now();
        let result = self.run_step(&run, step, index, record.id).await;
        let result = match result {
            Ok(result) => result,
            Err(e) => {
                self.fail_record(record.id, &e.to_string()).await?;
                self.record_step_activity(&run, step, Err(e.to_string().as_str()), started).await;
                return Err(e);
            }
        };

        let output = match result {
            StepResult::Output(output) => output,
            StepResult::BudgetDenied(reason) => {
                self.fail_record(record.id, &format!("Budget denied: {reason}"))
                    .await?;
                self.record_step_activity(&run, step, Err(reason.as_str()), started).await;
                self.request_approval(id, &reason).await?;
                return Ok(StepOutcome::Paused { reason });
            }
            StepResult::Failed(error) => {
                self.record_step_activity(&run, step, Err(error.as_str()), started).await;
                self.fail(id, &error).await?;
                return Ok(StepOutcome::Failed { error });
            }
        };

        let stored = output.clone();
        self.store
            .update_step_record(
                record.id,
                Box::new(move |record| {
                    record.complete(stored);
                    true
                }),
            )
            .await?;
        self.record_step_activity(&run, step, Ok(&output), started).await;
        self.audit.log(
            AuditEvent::ChainStepExecuted { index },
            &run.team_id.to_string(),
            &id.to_string(),
            AuditOutcome::Success,
            Some(step.name.clone()),
        );

        let sign_off = self.sign_off_reason(&run, step, &output).await?;
        let context = run.context.with_step_output(index, output);
        match evaluate_next_step(&step.branches, index, &context, self.evaluator.as_ref()) {
            NextStep::Index(next) if next < chain.steps.len() => {
                let outcome = self.advance(id, next, context).await?;
                let Some(reason) = sign_off else {
                    return Ok(outcome);
                };
                // Resuming continues at `next`; the step is not re-run.
                let updated = self.pause_inner(id, &reason).await?;
                if !updated.changed {
                    return Ok(outcome);
                }
                self.raise_approval(&updated.value, index, &reason).await?;
                Ok(StepOutcome::Paused { reason })
            }
            _ => {
                let run = self.finish(id, Some(context)).await?;
                Ok(match run.status {
                    ChainStatus::Completed => StepOutcome::Completed,
                    _ => StepOutcome::Idle,
                })
            }
        }
    }

    /// Dispatch the current step's parallel group as one batch; a
    /// sequential current step runs through [`Self::execute_step`].
    pub async fn execute_parallel_step_group(&self, id: ChainRunId) -> Result<StepOutcome> {
        let run = self.get(id).await?;
        if !run.is_running() {
            return Ok(StepOutcome::Idle);
        }
        let chain = self.catalog.get(&run.chain)?;
        let step = chain.step(run.current_step_index)?;
        let Some(group) = step.parallel_group() else {
            return self.execute_step(id).await;
        };
        let members = chain.group_members(group);

        let existing = self.store.step_records(id).await?;
        if existing
            .iter()
            .any(|record| members.contains(&record.step_index) && !record.status.is_finished())
        {
            warn!(run = %id, group, "Parallel group already dispatched");
            return Ok(StepOutcome::Waiting {
                group: group.into(),
            });
        }

        let mut jobs = Vec::with_capacity(members.len());
        for &step_index in &members {
            let record = ChainStepRecord::pending(id, step_index);
            self.store.insert_step_record(&record).await?;
            jobs.push(StepJob {
                chain_run_id: id,
                step_index,
                record_id: record.id,
            });
        }

        let batch = JobBatch::new(id, group, jobs.clone());
        let batch_name = batch.name.clone();
        if let Err(e) = self.queue.dispatch(batch).await {
            for job in &jobs {
                self.fail_record(job.record_id, &e.to_string()).await?;
            }
            return Err(e.into());
        }

        info!(run = %id, group, batch = %batch_name, jobs = jobs.len(), "Parallel group dispatched");
        self.audit.log(
            AuditEvent::ChainGroupDispatched {
                group: group.into(),
            },
            &run.team_id.to_string(),
            &id.to_string(),
            AuditOutcome::Success,
            Some(batch_name),
        );
        Ok(StepOutcome::Dispatched {
            group: group.into(),
            jobs: jobs.len(),
        })
    }

    /// Run one dispatched job. The record ends completed or failed; the run
    /// itself never moves here.
    pub async fn execute_dispatched_step(&self, job: &StepJob) -> Result<ChainStepRecord> {
        let run = self.get(job.chain_run_id).await?;
        if !run.is_running() {
            debug!(run = %run.id, index = job.step_index, "Chain not running; job skipped");
            return Ok(self
                .store
                .update_step_record(job.record_id, Box::new(|_| false))
                .await?
                .value);
        }

        let claimed = self
            .store
            .update_step_record(
                job.record_id,
                Box::new(|record| {
                    if record.status != StepStatus::Pending {
                        return false;
                    }
                    record.start();
                    true
                }),
            )
            .await?;
        if !claimed.changed {
            debug!(record = %job.record_id, status = claimed.value.status.as_str(), "Job already claimed");
            return Ok(claimed.value);
        }

        let chain = self.catalog.get(&run.chain)?;
        let step = chain.step(job.step_index)?;
        let started = Instant::now();
        let finished = match self.run_step(&run, step, job.step_index, job.record_id).await {
            Ok(StepResult::Output(output)) => {
                self.record_step_activity(&run, step, Ok(&output), started).await;
                self.store
                    .update_step_record(
                        job.record_id,
                        Box::new(move |record| {
                            record.complete(output);
                            true
                        }),
                    )
                    .await?
                    .value
            }
            Ok(StepResult::BudgetDenied(reason)) => {
                self.record_step_activity(&run, step, Err(reason.as_str()), started).await;
                self.fail_record(job.record_id, &format!("Budget denied: {reason}"))
                    .await?
            }
            Ok(StepResult::Failed(error)) => {
                self.record_step_activity(&run, step, Err(error.as_str()), started).await;
                self.fail_record(job.record_id, &error).await?
            }
            Err(e) => {
                self.record_step_activity(&run, step, Err(e.to_string().as_str()), started).await;
                self.fail_record(job.record_id, &e.to_string()).await?;
                return Err(e);
            }
        };

        self.audit.log(
            AuditEvent::ChainStepExecuted {
                index: job.step_index,
            },
            &run.team_id.to_string(),
            &run.id.to_string(),
            match finished.status {
                StepStatus::Completed => AuditOutcome::Success,
                _ => AuditOutcome::Failure,
            },
            Some(step.name.clone()),
        );
        Ok(finished)
    }

    /// Gather a finished group's outputs into `metadata.parallel_groups`
    /// and move past the group's last step.
    pub async fn complete_parallel_group(&self, id: ChainRunId, group: &str) -> Result<StepOutcome> {
        let run = self.get(id).await?;
        if !run.is_running() {
            return Ok(StepOutcome::Idle);
        }
        let chain = self.catalog.get(&run.chain)?;
        let members = chain.group_members(group);
        let Some(&last) = members.last() else {
            return Err(WorkflowError::InvalidChain {
                chain: chain.name.clone(),
                reason: format!("no parallel group '{group}'"),
            }
            .into());
        };

        // Latest record per member index.
        let latest: BTreeMap<usize, ChainStepRecord> = self
            .store
            .step_records(id)
            .await?
            .into_iter()
            .filter(|record| members.contains(&record.step_index))
            .map(|record| (record.step_index, record))
            .collect();

        let unfinished = members
            .iter()
            .filter(|&&index| latest.get(&index).is_none_or(|r| !r.status.is_finished()))
            .count();
        if unfinished > 0 {
            warn!(run = %id, group, unfinished, "Parallel group completed before all members finished");
            return Ok(StepOutcome::Waiting {
                group: group.into(),
            });
        }

        let mut context = run.context.clone();
        let mut aggregate = Map::new();
        for (index, record) in &latest {
            let entry = match (&record.status, &record.output) {
                (StepStatus::Completed, Some(output)) => {
                    context = context.with_step_output(*index, output.clone());
                    output.clone()
                }
                (StepStatus::Completed, None) => Value::Null,
                _ => json!({ "error": record.error }),
            };
            aggregate.insert(index.to_string(), entry);
        }

        let mut groups = context
            .metadata
            .get("parallel_groups")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        groups.insert(group.into(), Value::Object(aggregate));
        let mut extra = Map::new();
        extra.insert("parallel_groups".into(), Value::Object(groups));
        let context = context.with_metadata(extra);

        self.audit.log(
            AuditEvent::ChainGroupCompleted {
                group: group.into(),
            },
            &run.team_id.to_string(),
            &id.to_string(),
            AuditOutcome::Success,
            None,
        );

        let next = last + 1;
        if next < chain.steps.len() {
            self.advance(id, next, context).await
        } else {
            let run = self.finish(id, Some(context)).await?;
            Ok(match run.status {
                ChainStatus::Completed => StepOutcome::Completed,
                _ => StepOutcome::Idle,
            })
        }
    }

    // ── Internals ─────────────────────────────────────────────────────────

    async fn run_step(
        &self,
        run: &ChainRun,
        step: &ChainStep,
        index: usize,
        record_id: StepRecordId,
    ) -> Result<StepResult> {
        let (Some(kind), Some(agent_id)) = (step.workflow_kind.as_deref(), step.agent_id) else {
            debug!(run = %run.id, index, step = %step.name, "Static step");
            return Ok(StepResult::Output(step.input.clone()));
        };

        let configuration = self
            .agents
            .configuration(run.team_id, agent_id)
            .await?
            .ok_or_else(|| WorkflowError::UnknownAgent {
                agent: agent_id.to_string(),
                team: run.team_id.to_string(),
            })?;

        let input = step_input(&run.context.accumulated, &step.input);
        let scope = ChainScope {
            team_id: run.team_id,
            chain_run_id: run.id,
            trigger: run.trigger,
        };
        let budget = step
            .context
            .token_budget
            .unwrap_or(self.default_token_budget);
        let context = self
            .assembler
            .build_from_chain_context(&run.context, &scope, Some(agent_id), budget, &step.context.filter)
            .await?;

        let workflow = self
            .workflows
            .start(kind, input.clone(), run.team_id, Some(agent_id))
            .await?;
        let workflow_id = workflow.id;
        self.store
            .update_step_record(
                record_id,
                Box::new(move |record| {
                    record.workflow_run_id = Some(workflow_id);
                    true
                }),
            )
            .await?;

        let outcome = self
            .runner
            .run(AgentRunRequest {
                configuration: &configuration,
                workflow_kind: kind,
                context: &context,
                input: &input,
                estimated_cost: step.estimated_cost,
                workflow_run_id: Some(workflow_id),
                chain_run_id: Some(run.id),
            })
            .await;

        Ok(match outcome {
            RunOutcome::Completed(output) => {
                self.workflows
                    .complete(workflow_id, output.content.clone())
                    .await?;
                StepResult::Output(output.content)
            }
            RunOutcome::BudgetDenied { reason } => StepResult::BudgetDenied(reason),
            RunOutcome::Failed { error } => StepResult::Failed(error),
        })
    }

    async fn advance(&self, id: ChainRunId, next: usize, context: ChainContext) -> Result<StepOutcome> {
        let updated = self
            .store
            .update_chain_run(
                id,
                Box::new(move |run| {
                    if run.status != ChainStatus::Running {
                        return false;
                    }
                    run.current_step_index = next;
                    run.context = context;
                    run.updated_at = Utc::now();
                    true
                }),
            )
            .await?;
        if updated.changed {
            debug!(run = %id, next, "Chain advanced");
            Ok(StepOutcome::Advanced { next_index: next })
        } else {
            debug!(run = %id, status = updated.value.status.as_str(), "Chain left running mid-step; not advanced");
            Ok(StepOutcome::Idle)
        }
    }

    async fn fail_record(&self, record_id: StepRecordId, error: &str) -> Result<ChainStepRecord> {
        let error = error.to_string();
        let updated = self
            .store
            .update_step_record(
                record_id,
                Box::new(move |record| {
                    if record.status.is_finished() {
                        return false;
                    }
                    record.fail(error);
                    true
                }),
            )
            .await?;
        Ok(updated.value)
    }

    /// Why the output of `step` must be signed off before the chain moves
    /// on, or `None` when the team does not gate the step's action or the
    /// output scores for auto-approval.
    async fn sign_off_reason(
        &self,
        run: &ChainRun,
        step: &ChainStep,
        output: &Value,
    ) -> Result<Option<String>> {
        let Some(action) = step.approval_action.as_deref() else {
            return Ok(None);
        };
        let settings = self.settings.settings(run.team_id).await?;
        if !settings.requires_approval(action) {
            return Ok(None);
        }

        let suggestion = Suggestion {
            confidence: output.get("confidence").and_then(Value::as_f64).unwrap_or(0.0),
            budget_impact: step.estimated_cost,
        };
        if should_auto_approve(&settings, &suggestion) {
            info!(
                run = %run.id,
                step = %step.name,
                action,
                confidence = suggestion.confidence,
                "Step output auto-approved"
            );
            return Ok(None);
        }
        Ok(Some(format!(
            "Sign-off required for '{action}' after step '{}'",
            step.name
        )))
    }

    /// The workflow run linked to the latest record of `step_index`.
    async fn workflow_run_at(&self, run: &ChainRun, step_index: usize) -> Result<Option<WorkflowRunId>> {
        Ok(self
            .store
            .step_records(run.id)
            .await?
            .into_iter()
            .rev()
            .find(|record| record.step_index == step_index)
            .and_then(|record| record.workflow_run_id))
    }

    async fn purge_chain_memory(&self, run: &ChainRun) -> Result<()> {
        let purged = self
            .memory
            .purge(&MemoryAddress::chain(run.team_id, run.id))
            .await?;
        debug!(run = %run.id, purged, "Chain memory purged");
        Ok(())
    }

    async fn record_step_activity(
        &self,
        run: &ChainRun,
        step: &ChainStep,
        result: std::result::Result<&Value, &str>,
        started: Instant,
    ) {
        let status = match result {
            Ok(_) => ActivityStatus::Success,
            Err(_) => ActivityStatus::Failure,
        };
        let mut record = ActivityRecord::new(
            ActivityKind::ChainStep,
            status,
            run.team_id,
            step.name.as_str(),
            step.input.clone(),
        )
        .chain_run(run.id)
        .duration_ms(started.elapsed().as_millis() as u64);
        if let Some(agent_id) = step.agent_id {
            record = record.agent(agent_id);
        }
        record = match result {
            Ok(output) => record.output(output.clone()),
            Err(error) => record.error(error),
        };
        self.activity.append(record).await;
    }

    fn record(&self, updated: &Updated<ChainRun>, event: AuditEvent, details: Option<String>) {
        let run = &updated.value;
        let outcome = if updated.changed {
            info!(run = %run.id, event = ?event, status = run.status.as_str(), "Chain transition");
            AuditOutcome::Success
        } else {
            debug!(run = %run.id, event = ?event, status = run.status.as_str(), "Chain transition skipped");
            AuditOutcome::Skipped
        };
        self.audit.log(
            event,
            &run.team_id.to_string(),
            &run.id.to_string(),
            outcome,
            details,
        );
    }
}

/// The accumulated seed with the step's own input laid over it.
fn step_input(accumulated: &Value, step: &Value) -> Value {
    match (accumulated, step) {
        (Value::Object(base), Value::Object(overlay)) => {
            let mut merged = base.clone();
            merged.extend(overlay.clone());
            Value::Object(merged)
        }
        (base, Value::Null) => base.clone(),
        (_, overlay) => overlay.clone(),
    }
}

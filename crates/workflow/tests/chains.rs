//! End-to-end chain scenarios against the in-memory stores.

use async_trait::async_trait;
use foreman_agent::{
    AgentBackend, AgentContext, AgentOutput, AgentRunner, BackendError, ContextAssembler,
    EchoBackend,
};
use foreman_core::activity::ActivityKind;
use foreman_core::agent::{AgentConfiguration, BudgetState, InMemoryAgentDirectory};
use foreman_core::approval::{GlobalAiSettings, InMemoryApprovalInbox, StaticAiSettings};
use foreman_core::chain::{Condition, ConditionOp};
use foreman_core::entity::{EntityKind, InMemoryDirectory};
use foreman_core::error::{Error, WorkflowError};
use foreman_core::ids::{AgentId, TeamId};
use foreman_core::memory::{MemoryAddress, MemoryStore, StoreOptions};
use foreman_memory::InMemoryStore;
use foreman_security::audit::{AuditLogger, AuditOutcome};
use foreman_telemetry::{ActivityLogger, InMemoryLedger};
use foreman_workflow::{
    BranchAction, BranchRule, ChainCatalog, ChainDefinition, ChainDriver, ChainEngine,
    ChainServices, ChainStatus, ChainStep, InMemoryRunStore, RecordingJobQueue,
    StaticCustomizations, StepOutcome, StepStatus, WorkflowEngine,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

struct Harness {
    engine: Arc<ChainEngine>,
    driver: ChainDriver,
    queue: Arc<RecordingJobQueue>,
    workflows: Arc<WorkflowEngine>,
    memory: Arc<InMemoryStore>,
    ledger: Arc<InMemoryLedger>,
    inbox: Arc<InMemoryApprovalInbox>,
    settings: Arc<StaticAiSettings>,
    activity: Arc<ActivityLogger>,
    audit: Arc<AuditLogger>,
    team: TeamId,
    writer: AgentConfiguration,
}

fn harness_with(
    chains: impl FnOnce(AgentId) -> Vec<ChainDefinition>,
    backend: Arc<dyn AgentBackend>,
) -> Harness {
    let team = TeamId::new();
    let writer = AgentConfiguration::new(team, AgentId::new(), "Writer");

    let agents = Arc::new(InMemoryAgentDirectory::new());
    agents.insert(writer.clone());
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.set_budget(writer.id, BudgetState::with_monthly_cap(100.0));

    let memory = Arc::new(InMemoryStore::new());
    let activity = Arc::new(ActivityLogger::new());
    let audit = Arc::new(AuditLogger::new());
    let inbox = Arc::new(InMemoryApprovalInbox::new());
    let queue = Arc::new(RecordingJobQueue::new());
    let settings = Arc::new(StaticAiSettings::new());

    let workflows = Arc::new(WorkflowEngine::new(
        Arc::new(InMemoryRunStore::new()),
        Arc::new(StaticCustomizations::new()),
        audit.clone(),
    ));
    let runner = AgentRunner::new(backend, activity.clone()).with_ledger(ledger.clone());
    let assembler = ContextAssembler::new(Arc::new(InMemoryDirectory::new()), memory.clone());

    let engine = Arc::new(ChainEngine::new(ChainServices {
        catalog: Arc::new(ChainCatalog::new(chains(writer.agent_id)).unwrap()),
        workflows: workflows.clone(),
        assembler: Arc::new(assembler),
        runner: Arc::new(runner),
        agents,
        memory: memory.clone(),
        queue: queue.clone(),
        inbox: inbox.clone(),
        activity: activity.clone(),
        audit: audit.clone(),
    })
    .with_ai_settings(settings.clone()));

    Harness {
        driver: ChainDriver::new(engine.clone(), queue.clone()),
        engine,
        workflows,
        queue,
        memory,
        ledger,
        inbox,
        settings,
        activity,
        audit,
        team,
        writer,
    }
}

fn harness(chains: impl FnOnce(AgentId) -> Vec<ChainDefinition>) -> Harness {
    let backend = EchoBackend::new()
        .with_response("status_report", json!({"summary": "On track"}))
        .with_response("legal_review", json!({"approved": true}));
    harness_with(chains, Arc::new(backend))
}

#[tokio::test]
async fn two_step_chain_runs_to_completion() {
    let h = harness(|writer| {
        vec![ChainDefinition::new(
            "weekly_update",
            vec![
                ChainStep::new("gather").input(json!({"facts": ["launch moved"]})),
                ChainStep::new("summarize").agent("status_report", writer),
            ],
        )]
    });

    let run = h
        .engine
        .start("weekly_update", h.team, json!({"week": 42}), None)
        .await
        .unwrap();
    let run = h.driver.run(run.id).await.unwrap();

    assert_eq!(run.status, ChainStatus::Completed);
    assert_eq!(run.context.output(0).unwrap()["facts"][0], "launch moved");
    assert_eq!(run.context.output(1).unwrap()["summary"], "On track");
    assert_eq!(run.context.metadata["chain"], "weekly_update");

    let records = h.engine.step_records(run.id).await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.status == StepStatus::Completed));
    assert!(records[0].workflow_run_id.is_none());

    let workflow_id = records[1].workflow_run_id.unwrap();
    let workflow = h.workflows.get(workflow_id).await.unwrap();
    assert!(workflow.is_completed());
    assert_eq!(workflow.state.result["summary"], "On track");
    assert_eq!(workflow.state.input["week"], 42);

    assert_eq!(h.activity.entries_by_kind(ActivityKind::ChainStep).len(), 2);
    assert_eq!(h.activity.entries_by_kind(ActivityKind::AgentRun).len(), 1);
}

#[tokio::test]
async fn chain_memory_is_gone_after_completion() {
    let h = harness(|_| {
        vec![ChainDefinition::new(
            "scratch",
            vec![ChainStep::new("only").input(json!({"done": true}))],
        )]
    });
    let run = h.engine.start("scratch", h.team, Value::Null, None).await.unwrap();

    h.memory
        .store(
            &MemoryAddress::chain(h.team, run.id),
            "draft",
            json!("v1"),
            StoreOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(h.memory.chain_memories(h.team, run.id).await.unwrap().len(), 1);

    let outcome = h.engine.execute_step(run.id).await.unwrap();
    assert_eq!(outcome, StepOutcome::Completed);
    assert!(h.memory.chain_memories(h.team, run.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn budget_denial_pauses_for_approval_then_resumes() {
    let h = harness(|writer| {
        vec![ChainDefinition::new(
            "campaign",
            vec![ChainStep::new("write").agent("status_report", writer).cost(50.0)],
        )]
    });
    h.ledger.set_budget(
        h.writer.id,
        BudgetState {
            daily_spend: 60.0,
            ..BudgetState::with_monthly_cap(100.0)
        },
    );

    let run = h.engine.start("campaign", h.team, json!({}), None).await.unwrap();
    let paused = h.driver.run(run.id).await.unwrap();
    assert_eq!(paused.status, ChainStatus::Paused);
    assert!(paused.context.metadata.contains_key("pause_reason"));

    let pending = h.inbox.pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].request.subject.kind, EntityKind::WorkflowRun);

    let records = h.engine.step_records(run.id).await.unwrap();
    assert_eq!(records[0].status, StepStatus::Failed);
    let workflow_id = records[0].workflow_run_id.unwrap();
    assert!(h.workflows.get(workflow_id).await.unwrap().is_paused());

    // Approved with a fresh budget.
    h.ledger
        .set_budget(h.writer.id, BudgetState::with_monthly_cap(100.0));
    let resumed = h.engine.resume(run.id, json!({"approved_by": "ops"})).await.unwrap();
    assert_eq!(resumed.status, ChainStatus::Running);
    assert_eq!(resumed.context.metadata["resume_data"]["approved_by"], "ops");

    let workflow = h.workflows.get(workflow_id).await.unwrap();
    assert!(!workflow.is_paused());
    assert_eq!(workflow.state.approval["approved_by"], "ops");

    let done = h.driver.run(run.id).await.unwrap();
    assert_eq!(done.status, ChainStatus::Completed);
    let records = h.engine.step_records(run.id).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].status, StepStatus::Completed);
}

#[tokio::test]
async fn skip_branch_jumps_over_a_step() {
    let h = harness(|_| {
        vec![ChainDefinition::new(
            "triage",
            vec![
                ChainStep::new("check")
                    .input(json!({"approved": false}))
                    .branch(BranchRule::when(
                        Condition::equals("last.approved", json!(false)),
                        BranchAction::Skip,
                    )),
                ChainStep::new("publish").input(json!({"published": true})),
                ChainStep::new("notify").input(json!({"notified": true})),
            ],
        )]
    });
    let run = h.engine.start("triage", h.team, Value::Null, None).await.unwrap();

    assert_eq!(
        h.engine.execute_step(run.id).await.unwrap(),
        StepOutcome::Advanced { next_index: 2 }
    );
    let run = h.driver.run(run.id).await.unwrap();
    assert_eq!(run.status, ChainStatus::Completed);
    assert!(run.context.output(1).is_none());
    assert_eq!(run.context.output(2).unwrap()["notified"], true);
}

/// Each run produces the next revision number.
#[derive(Default)]
struct RevisingBackend {
    revisions: AtomicU64,
}

#[async_trait]
impl AgentBackend for RevisingBackend {
    fn name(&self) -> &str {
        "revising"
    }

    async fn execute(
        &self,
        _workflow_kind: &str,
        _context: &AgentContext,
        _input: &Value,
    ) -> Result<AgentOutput, BackendError> {
        let revision = self.revisions.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(AgentOutput {
            content: json!({"from": "draft", "revision": revision}),
            tokens: 10,
            cost: 0.0,
        })
    }
}

#[tokio::test]
async fn goto_loops_back_until_the_draft_is_ready() {
    let h = harness_with(
        |writer| {
            vec![ChainDefinition::new(
                "revise",
                vec![
                    ChainStep::new("draft")
                        .agent("draft", writer)
                        .branch(BranchRule::when(
                            Condition::equals("last.from", json!("review")),
                            BranchAction::Terminate,
                        ))
                        .branch(BranchRule::when(
                            Condition::new("last.revision", ConditionOp::Gte, Some(json!(2))),
                            BranchAction::Goto { target: Some(2) },
                        )),
                    ChainStep::new("review")
                        .input(json!({"from": "review"}))
                        .branch(BranchRule::always(BranchAction::Goto { target: Some(0) })),
                    ChainStep::new("publish")
                        .input(json!({"published": true}))
                        .branch(BranchRule::always(BranchAction::Goto { target: None })),
                ],
            )]
        },
        Arc::new(RevisingBackend::default()),
    );
    let run = h.engine.start("revise", h.team, Value::Null, None).await.unwrap();

    assert_eq!(
        h.engine.execute_step(run.id).await.unwrap(),
        StepOutcome::Advanced { next_index: 1 }
    );
    assert_eq!(
        h.engine.execute_step(run.id).await.unwrap(),
        StepOutcome::Advanced { next_index: 0 }
    );

    // The re-run draft is now the last step, not the later-indexed review.
    assert_eq!(
        h.engine.execute_step(run.id).await.unwrap(),
        StepOutcome::Advanced { next_index: 2 }
    );
    let looped = h.engine.get(run.id).await.unwrap();
    assert_eq!(looped.context.last_index(), Some(0));
    assert_eq!(looped.context.snapshot()["last"]["revision"], 2);
    assert_eq!(looped.context.execution_order, [1, 0]);

    assert_eq!(h.engine.execute_step(run.id).await.unwrap(), StepOutcome::Completed);
    let run = h.engine.get(run.id).await.unwrap();
    assert_eq!(run.status, ChainStatus::Completed);
    assert_eq!(run.context.last_output().unwrap()["published"], true);
    assert_eq!(run.context.execution_order, [1, 0, 2]);

    let records = h.engine.step_records(run.id).await.unwrap();
    let order: Vec<usize> = records.iter().map(|r| r.step_index).collect();
    assert_eq!(order, [0, 1, 0, 2]);
    assert!(records.iter().all(|r| r.status == StepStatus::Completed));
}

#[tokio::test]
async fn goto_past_the_last_step_completes_the_run() {
    let h = harness(|_| {
        vec![ChainDefinition::new(
            "early_exit",
            vec![
                ChainStep::new("check")
                    .input(json!({"done": true}))
                    .branch(BranchRule::when(
                        Condition::truthy("last.done"),
                        BranchAction::Goto { target: Some(10) },
                    )),
                ChainStep::new("never").input(json!({"ran": true})),
            ],
        )]
    });
    let run = h.engine.start("early_exit", h.team, Value::Null, None).await.unwrap();

    assert_eq!(h.engine.execute_step(run.id).await.unwrap(), StepOutcome::Completed);
    let run = h.engine.get(run.id).await.unwrap();
    assert_eq!(run.status, ChainStatus::Completed);
    assert!(run.context.output(1).is_none());
}

fn sign_off_chain(writer: AgentId) -> Vec<ChainDefinition> {
    vec![ChainDefinition::new(
        "client_update",
        vec![
            ChainStep::new("draft")
                .agent("status_report", writer)
                .requires_approval("client_communication"),
            ChainStep::new("send").input(json!({"sent": true})),
        ],
    )]
}

fn gated(threshold: Option<f64>) -> GlobalAiSettings {
    GlobalAiSettings {
        approval_required_actions: ["client_communication".to_string()].into(),
        auto_approve_threshold: threshold,
    }
}

#[tokio::test]
async fn gated_step_pauses_for_sign_off_before_moving_on() {
    let h = harness(sign_off_chain);
    h.settings.set(h.team, gated(Some(0.8)));
    let run = h.engine.start("client_update", h.team, Value::Null, None).await.unwrap();

    let outcome = h.engine.execute_step(run.id).await.unwrap();
    assert!(matches!(outcome, StepOutcome::Paused { ref reason } if reason.contains("client_communication")));

    let paused = h.engine.get(run.id).await.unwrap();
    assert_eq!(paused.status, ChainStatus::Paused);
    assert_eq!(paused.current_step_index, 1);
    assert_eq!(paused.context.output(0).unwrap()["summary"], "On track");

    let pending = h.inbox.pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].request.content["step_index"], 0);

    h.engine.resume(run.id, json!({"approved": true})).await.unwrap();
    let run = h.driver.run(run.id).await.unwrap();
    assert_eq!(run.status, ChainStatus::Completed);
    assert_eq!(run.context.output(1).unwrap()["sent"], true);

    // The draft ran once; sign-off did not re-run it.
    let order: Vec<usize> = h
        .engine
        .step_records(run.id)
        .await
        .unwrap()
        .iter()
        .map(|r| r.step_index)
        .collect();
    assert_eq!(order, [0, 1]);
}

#[tokio::test]
async fn confident_output_is_auto_approved() {
    let backend = EchoBackend::new()
        .with_response("status_report", json!({"summary": "On track", "confidence": 0.9}));
    let h = harness_with(sign_off_chain, Arc::new(backend));
    h.settings.set(h.team, gated(Some(0.8)));
    let run = h.engine.start("client_update", h.team, Value::Null, None).await.unwrap();

    assert_eq!(
        h.engine.execute_step(run.id).await.unwrap(),
        StepOutcome::Advanced { next_index: 1 }
    );
    assert!(h.inbox.pending().is_empty());
}

#[tokio::test]
async fn ungated_team_never_pauses_for_sign_off() {
    let h = harness(sign_off_chain);
    let run = h.engine.start("client_update", h.team, Value::Null, None).await.unwrap();
    let run = h.driver.run(run.id).await.unwrap();
    assert_eq!(run.status, ChainStatus::Completed);
    assert!(h.inbox.pending().is_empty());
}

#[tokio::test]
async fn terminate_branch_completes_early() {
    let h = harness(|_| {
        vec![ChainDefinition::new(
            "short",
            vec![
                ChainStep::new("first").branch(BranchRule::always(BranchAction::Terminate)),
                ChainStep::new("never"),
            ],
        )]
    });
    let run = h.engine.start("short", h.team, Value::Null, None).await.unwrap();
    let run = h.driver.run(run.id).await.unwrap();

    assert_eq!(run.status, ChainStatus::Completed);
    assert_eq!(h.engine.step_records(run.id).await.unwrap().len(), 1);
}

fn review_chain(writer: AgentId) -> Vec<ChainDefinition> {
    vec![ChainDefinition::new(
        "review",
        vec![
            ChainStep::new("draft").input(json!({"text": "Hello"})),
            ChainStep::new("legal")
                .agent("legal_review", writer)
                .parallel("reviews"),
            ChainStep::new("brand")
                .input(json!({"tone": "ok"}))
                .parallel("reviews"),
            ChainStep::new("publish").input(json!({"published": true})),
        ],
    )]
}

#[tokio::test]
async fn parallel_group_aggregates_member_outputs() {
    let h = harness(review_chain);
    let run = h.engine.start("review", h.team, Value::Null, None).await.unwrap();
    let run = h.driver.run(run.id).await.unwrap();

    assert_eq!(run.status, ChainStatus::Completed);
    let group = &run.context.metadata["parallel_groups"]["reviews"];
    assert_eq!(group["1"]["approved"], true);
    assert_eq!(group["2"]["tone"], "ok");
    assert_eq!(run.context.output(3).unwrap()["published"], true);
    assert_eq!(h.engine.step_records(run.id).await.unwrap().len(), 4);
}

#[tokio::test]
async fn parallel_group_is_a_barrier() {
    let h = harness(review_chain);
    let run = h.engine.start("review", h.team, Value::Null, None).await.unwrap();

    assert_eq!(
        h.engine.execute_step(run.id).await.unwrap(),
        StepOutcome::Advanced { next_index: 1 }
    );
    assert_eq!(
        h.engine.execute_parallel_step_group(run.id).await.unwrap(),
        StepOutcome::Dispatched {
            group: "reviews".into(),
            jobs: 2
        }
    );
    // A second dispatch while members are pending is refused.
    assert!(matches!(
        h.engine.execute_parallel_step_group(run.id).await.unwrap(),
        StepOutcome::Waiting { .. }
    ));
    assert_eq!(h.queue.len(), 1);

    let batch = h.queue.drain().remove(0);
    assert_eq!(batch.name, format!("chain:{}:reviews", run.id));
    let jobs = batch.jobs;
    assert_eq!(jobs.len(), 2);

    assert!(matches!(
        h.engine.complete_parallel_group(run.id, "reviews").await.unwrap(),
        StepOutcome::Waiting { .. }
    ));
    h.engine.execute_dispatched_step(&jobs[0]).await.unwrap();
    assert!(matches!(
        h.engine.complete_parallel_group(run.id, "reviews").await.unwrap(),
        StepOutcome::Waiting { .. }
    ));
    h.engine.execute_dispatched_step(&jobs[1]).await.unwrap();
    assert_eq!(
        h.engine.complete_parallel_group(run.id, "reviews").await.unwrap(),
        StepOutcome::Advanced { next_index: 3 }
    );
}

#[tokio::test]
async fn terminal_runs_ignore_every_operation() {
    let h = harness(|_| {
        vec![ChainDefinition::new("one", vec![ChainStep::new("a")])]
    });
    let run = h.engine.start("one", h.team, Value::Null, None).await.unwrap();
    let done = h.engine.complete(run.id).await.unwrap();
    assert_eq!(done.status, ChainStatus::Completed);

    let skipped_before = h.audit.entries_by_outcome(&AuditOutcome::Skipped).len();
    assert_eq!(h.engine.pause(run.id, "late").await.unwrap().status, ChainStatus::Completed);
    assert_eq!(h.engine.resume(run.id, json!({})).await.unwrap().status, ChainStatus::Completed);
    assert_eq!(h.engine.fail(run.id, "late").await.unwrap().status, ChainStatus::Completed);
    assert_eq!(h.engine.complete(run.id).await.unwrap(), done);
    assert_eq!(h.engine.execute_step(run.id).await.unwrap(), StepOutcome::Idle);

    assert_eq!(
        h.audit.entries_by_outcome(&AuditOutcome::Skipped).len(),
        skipped_before + 4
    );
    assert!(h.engine.step_records(run.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn fail_without_records_synthesizes_one() {
    let h = harness(|_| {
        vec![ChainDefinition::new("one", vec![ChainStep::new("a")])]
    });
    let run = h.engine.start("one", h.team, Value::Null, None).await.unwrap();
    h.engine.pause(run.id, "waiting").await.unwrap();

    let failed = h.engine.fail(run.id, "cancelled by user").await.unwrap();
    assert_eq!(failed.status, ChainStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("cancelled by user"));

    let records = h.engine.step_records(run.id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, StepStatus::Failed);
    assert_eq!(records[0].error.as_deref(), Some("cancelled by user"));
}

#[tokio::test]
async fn unknown_agent_fails_the_step_record() {
    let stranger = AgentId::new();
    let h = harness(move |_| {
        vec![ChainDefinition::new(
            "lost",
            vec![ChainStep::new("ghost").agent("status_report", stranger)],
        )]
    });
    let run = h.engine.start("lost", h.team, Value::Null, None).await.unwrap();

    let err = h.engine.execute_step(run.id).await.unwrap_err();
    assert!(matches!(err, Error::Workflow(WorkflowError::UnknownAgent { .. })));

    let records = h.engine.step_records(run.id).await.unwrap();
    assert_eq!(records[0].status, StepStatus::Failed);
    assert_eq!(h.engine.get(run.id).await.unwrap().status, ChainStatus::Running);
}

struct BrokenBackend;

#[async_trait]
impl AgentBackend for BrokenBackend {
    fn name(&self) -> &str {
        "broken"
    }

    async fn execute(
        &self,
        _workflow_kind: &str,
        _context: &AgentContext,
        _input: &Value,
    ) -> Result<AgentOutput, BackendError> {
        Err(BackendError::Unavailable("model offline".into()))
    }
}

#[tokio::test]
async fn backend_failure_fails_the_chain() {
    let h = harness_with(
        |writer| {
            vec![ChainDefinition::new(
                "doomed",
                vec![ChainStep::new("write").agent("status_report", writer)],
            )]
        },
        Arc::new(BrokenBackend),
    );

    let run = h.engine.start("doomed", h.team, Value::Null, None).await.unwrap();
    let run = h.driver.run(run.id).await.unwrap();

    assert_eq!(run.status, ChainStatus::Failed);
    assert!(run.error.unwrap().contains("model offline"));
    let records = h.engine.step_records(run.id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, StepStatus::Failed);
}

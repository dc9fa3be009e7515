//! `foreman chain` — run and validate chains from a fixture file.

use crate::fixture::Fixture;
use foreman_agent::{AgentRunner, ContextAssembler, EchoBackend};
use foreman_config::AppConfig;
use foreman_core::agent::InMemoryAgentDirectory;
use foreman_core::approval::InMemoryApprovalInbox;
use foreman_core::entity::InMemoryDirectory;
use foreman_core::memory::MemoryStore;
use foreman_memory::{InMemoryStore, SqliteMemoryStore};
use foreman_security::audit::{AuditLogger, TracingSink};
use foreman_telemetry::{ActivityLogger, InMemoryLedger, TracingActivitySink};
use foreman_workflow::{
    ChainDriver, ChainEngine, ChainServices, ChainStatus, InMemoryRunStore, RecordingJobQueue,
    RunStore, SqliteRunStore, StaticCustomizations, WorkflowEngine,
};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Everything a fixture run needs, wired against in-memory collaborators.
pub struct Runtime {
    pub engine: Arc<ChainEngine>,
    pub driver: ChainDriver,
    pub activity: Arc<ActivityLogger>,
    pub inbox: Arc<InMemoryApprovalInbox>,
}

pub async fn build_runtime(
    fixture: &Fixture,
    config: &AppConfig,
    db: Option<&str>,
) -> anyhow::Result<Runtime> {
    let (store, memory): (Arc<dyn RunStore>, Arc<dyn MemoryStore>) = match db {
        Some(url) => {
            let pool_size = config.database.max_connections;
            (
                Arc::new(SqliteRunStore::connect(url, pool_size).await?),
                Arc::new(SqliteMemoryStore::connect(url, pool_size).await?),
            )
        }
        None => (Arc::new(InMemoryRunStore::new()), Arc::new(InMemoryStore::new())),
    };

    let directory = Arc::new(InMemoryDirectory::new());
    for project in &fixture.projects {
        directory.insert_project(project.clone());
    }

    let agents = Arc::new(InMemoryAgentDirectory::new());
    let ledger = Arc::new(InMemoryLedger::new());
    for configuration in fixture.configurations() {
        ledger.set_budget(configuration.id, configuration.budget.clone());
        agents.insert(configuration);
    }

    let backend = fixture
        .responses
        .iter()
        .fold(EchoBackend::new(), |backend, (kind, content)| {
            backend.with_response(kind.as_str(), content.clone())
        });

    let audit = Arc::new(AuditLogger::with_sinks(vec![Box::new(TracingSink)]));
    let activity = Arc::new(ActivityLogger::with_sinks(vec![Arc::new(TracingActivitySink)]));
    let inbox = Arc::new(InMemoryApprovalInbox::new());
    let queue = Arc::new(RecordingJobQueue::new());

    let workflows = Arc::new(
        WorkflowEngine::new(store, Arc::new(StaticCustomizations::new()), audit.clone())
            .with_config(config),
    );
    let runner = AgentRunner::new(Arc::new(backend), activity.clone()).with_ledger(ledger);

    let engine = Arc::new(
        ChainEngine::new(ChainServices {
            catalog: Arc::new(fixture.catalog()?),
            workflows,
            assembler: Arc::new(ContextAssembler::new(directory, memory.clone())),
            runner: Arc::new(runner),
            agents,
            memory,
            queue: queue.clone(),
            inbox: inbox.clone(),
            activity: activity.clone(),
            audit,
        })
        .with_config(config),
    );

    Ok(Runtime {
        driver: ChainDriver::new(engine.clone(), queue),
        engine,
        activity,
        inbox,
    })
}

pub async fn run(
    config: &AppConfig,
    fixture_path: &Path,
    chain: &str,
    db: Option<&str>,
    json_report: bool,
) -> anyhow::Result<()> {
    let fixture = Fixture::load(fixture_path)?;
    let runtime = build_runtime(&fixture, config, db).await?;
    info!(chain, fixture = %fixture_path.display(), persistent = db.is_some(), "Running chain");

    let started = runtime
        .engine
        .start(chain, fixture.team_id, fixture.seed.clone(), fixture.trigger)
        .await?;
    let run = runtime.driver.run(started.id).await?;
    let steps = runtime.engine.step_records(run.id).await?;
    let approvals = runtime.inbox.pending();

    if json_report {
        let report = json!({
            "run": run,
            "steps": steps,
            "approvals": approvals,
            "activity": runtime.activity.entries(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let icon = match run.status {
        ChainStatus::Completed => "✅",
        ChainStatus::Paused => "⏸️ ",
        ChainStatus::Failed => "❌",
        ChainStatus::Running => "🔄",
    };
    println!("{icon} Chain '{chain}' {} (run {})", run.status.as_str(), run.id);
    for record in &steps {
        let name = runtime
            .engine
            .catalog()
            .get(chain)?
            .step(record.step_index)
            .map(|step| step.name.as_str())
            .unwrap_or("?");
        println!("   {:>2}. {:<16} {}", record.step_index, name, record.status.as_str());
        if let Some(error) = &record.error {
            println!("       {error}");
        }
    }
    if let Some(output) = run.context.last_output() {
        println!();
        println!("   Last output: {output}");
    }
    for request in &approvals {
        println!("   Approval pending: {} ({})", request.request.title, request.request.preview);
    }
    println!(
        "   Activity: {} records, ${:.2} spent",
        runtime.activity.count(),
        runtime.activity.total_cost()
    );
    Ok(())
}

pub fn validate(fixture_path: &Path) -> anyhow::Result<()> {
    println!("🔍 Validating {}...", fixture_path.display());
    let fixture = Fixture::load(fixture_path)?;
    let catalog = fixture.catalog()?;

    for name in catalog.names() {
        let definition = catalog.get(name)?;
        println!("   ✅ {name} ({} steps)", definition.steps.len());
    }

    let unknown = fixture.unknown_agents();
    if unknown.is_empty() {
        println!("   ✅ All agents defined");
        return Ok(());
    }
    for (chain, step) in &unknown {
        println!("   ⚠️  {chain}/{step} names an agent the fixture does not define");
    }
    anyhow::bail!("{} step(s) reference undefined agents", unknown.len())
}

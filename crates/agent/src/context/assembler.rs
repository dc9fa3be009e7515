//! Context assembly pipeline.
//!
//! Builds the three tiers of an [`AgentContext`] from read-only domain
//! snapshots plus whatever non-expired memory is stored at each tier's
//! scope, then truncates the result to a token budget.
//!
//! Two entry points:
//!
//! - [`ContextAssembler::build`] anchors on a single entity
//! - [`ContextAssembler::build_from_chain_context`] anchors on a chain
//!   run's trigger (if any) and adds prior step outputs plus chain-scoped
//!   memory
//!
//! Assembly is deterministic for a given directory and memory state.

use super::agent_context::AgentContext;
use super::filter::OutputFilter;
use super::hierarchy::ContextHierarchy;
use super::truncation::truncate;
use foreman_core::chain::ChainContext;
use foreman_core::entity::{DomainDirectory, EntityRef};
use foreman_core::error::ContextError;
use foreman_core::ids::{AgentId, ChainRunId, TeamId};
use foreman_core::memory::{MemoryAddress, MemoryStore, entries_to_object};
use serde_json::{Map, Value, json};
use std::sync::Arc;

// ── Types ─────────────────────────────────────────────────────────────────

/// Where a chain step's context comes from.
#[derive(Debug, Clone, Copy)]
pub struct ChainScope {
    pub team_id: TeamId,
    pub chain_run_id: ChainRunId,
    /// Entity that triggered the chain; anchors the three tiers.
    pub trigger: Option<EntityRef>,
}

/// Builds agent contexts against a domain directory and a memory store.
pub struct ContextAssembler {
    directory: Arc<dyn DomainDirectory>,
    memory: Arc<dyn MemoryStore>,
    /// How many of a project's most recent work orders to list.
    recent_work_orders: usize,
}

const DEFAULT_RECENT_WORK_ORDERS: usize = 10;

// ── Implementation ──────────────────────────────────────────────────────────

impl ContextAssembler {
    pub fn new(directory: Arc<dyn DomainDirectory>, memory: Arc<dyn MemoryStore>) -> Self {
        Self {
            directory,
            memory,
            recent_work_orders: DEFAULT_RECENT_WORK_ORDERS,
        }
    }

    pub fn with_recent_work_orders(mut self, limit: usize) -> Self {
        self.recent_work_orders = limit;
        self
    }

    /// Assemble the context of one entity.
    pub async fn build(
        &self,
        anchor: &EntityRef,
        agent: Option<AgentId>,
        budget: usize,
    ) -> Result<AgentContext, ContextError> {
        let hierarchy = ContextHierarchy::resolve(self.directory.as_ref(), anchor).await?;
        let mut context = self.tiers(&hierarchy).await?;
        context.metadata.insert("anchor".into(), json!(anchor.to_string()));
        Ok(finish(context, agent, budget))
    }

    /// Assemble the context of a chain step.
    ///
    /// Prior outputs land in the project tier as `previous_outputs`, most
    /// recent step first, each shaped by `filter`. Chain-scoped memory
    /// lands there as `chain_memories`.
    pub async fn build_from_chain_context(
        &self,
        chain: &ChainContext,
        scope: &ChainScope,
        agent: Option<AgentId>,
        budget: usize,
        filter: &OutputFilter,
    ) -> Result<AgentContext, ContextError> {
        let mut context = match &scope.trigger {
            Some(trigger) => {
                let hierarchy = ContextHierarchy::resolve(self.directory.as_ref(), trigger).await?;
                let mut context = self.tiers(&hierarchy).await?;
                context.metadata.insert("anchor".into(), json!(trigger.to_string()));
                context
            }
            None => AgentContext::new(),
        };

        let previous: Vec<Value> = chain
            .outputs_by_recency()
            .into_iter()
            .map(|(index, output)| json!({ "step": index, "output": filter.apply(output) }))
            .collect();
        if !previous.is_empty() {
            context
                .project
                .insert("previous_outputs".into(), Value::Array(previous));
        }

        let chain_memories = self
            .memory
            .chain_memories(scope.team_id, scope.chain_run_id)
            .await?;
        if !chain_memories.is_empty() {
            context.project.insert(
                "chain_memories".into(),
                Value::Object(entries_to_object(&chain_memories)),
            );
        }

        context
            .metadata
            .insert("chain_run_id".into(), json!(scope.chain_run_id));
        if let Some(name) = chain.metadata.get("chain") {
            context.metadata.insert("chain".into(), name.clone());
        }

        Ok(finish(context, agent, budget))
    }

    async fn tiers(&self, hierarchy: &ContextHierarchy) -> Result<AgentContext, ContextError> {
        Ok(AgentContext {
            project: self.project_tier(hierarchy).await?,
            client: self.client_tier(hierarchy).await?,
            org: self.org_tier(hierarchy).await?,
            metadata: Map::new(),
        })
    }

    async fn project_tier(
        &self,
        hierarchy: &ContextHierarchy,
    ) -> Result<Map<String, Value>, ContextError> {
        let Some(project) = &hierarchy.project else {
            return Ok(Map::new());
        };

        let work_orders = self.directory.project_work_orders(project.id).await?;
        let tasks = self.directory.project_tasks(project.id).await?;
        let recent: Vec<Value> = work_orders
            .iter()
            .take(self.recent_work_orders)
            .map(|wo| json!({ "id": wo.id, "title": wo.title, "status": wo.status, "due_date": wo.due_date }))
            .collect();
        let pending: Vec<Value> = tasks
            .iter()
            .filter(|t| t.is_pending())
            .map(|t| json!({ "id": t.id, "title": t.title, "status": t.status, "due_date": t.due_date }))
            .collect();
        let statistics = json!({
            "work_orders": work_orders.len(),
            "tasks": tasks.len(),
            "pending_tasks": pending.len(),
        });

        let mut tier = compact(json!({
            "id": project.id,
            "name": project.name,
            "status": project.status,
            "description": project.description,
            "due_date": project.due_date,
            "tags": project.tags,
            "notes": project.notes,
            "recent_work_orders": recent,
            "pending_tasks": pending,
            "statistics": statistics,
        }));

        if let Some(wo) = &hierarchy.work_order {
            tier.insert(
                "work_order".into(),
                Value::Object(compact(json!({
                    "id": wo.id,
                    "title": wo.title,
                    "status": wo.status,
                    "description": wo.description,
                    "due_date": wo.due_date,
                }))),
            );
        }
        if let Some(task) = &hierarchy.task {
            tier.insert(
                "task".into(),
                Value::Object(compact(json!({
                    "id": task.id,
                    "title": task.title,
                    "status": task.status,
                    "due_date": task.due_date,
                }))),
            );
        }

        let address = MemoryAddress::project(hierarchy.team_id(), project.id);
        self.append_memories(&mut tier, &address).await?;
        Ok(tier)
    }

    async fn client_tier(
        &self,
        hierarchy: &ContextHierarchy,
    ) -> Result<Map<String, Value>, ContextError> {
        let Some(party) = &hierarchy.party else {
            return Ok(Map::new());
        };

        let active: Vec<Value> = self
            .directory
            .party_projects(party.id)
            .await?
            .iter()
            .filter(|p| p.is_active())
            .map(|p| json!({ "id": p.id, "name": p.name, "status": p.status }))
            .collect();

        let mut tier = compact(json!({
            "id": party.id,
            "name": party.name,
            "kind": party.kind,
            "contacts": party.contacts,
            "tags": party.tags,
            "notes": party.notes,
            "active_projects": active,
        }));

        let address = MemoryAddress::client(hierarchy.team_id(), party.id);
        self.append_memories(&mut tier, &address).await?;
        Ok(tier)
    }

    async fn org_tier(
        &self,
        hierarchy: &ContextHierarchy,
    ) -> Result<Map<String, Value>, ContextError> {
        let team = &hierarchy.team;
        let mut tier = compact(json!({
            "id": team.id,
            "name": team.name,
            "description": team.description,
            "tags": team.tags,
            "notes": team.notes,
        }));

        self.append_memories(&mut tier, &MemoryAddress::org(team.id))
            .await?;
        Ok(tier)
    }

    async fn append_memories(
        &self,
        tier: &mut Map<String, Value>,
        address: &MemoryAddress,
    ) -> Result<(), ContextError> {
        let entries = self.memory.entries(address).await?;
        if !entries.is_empty() {
            tier.insert("memories".into(), Value::Object(entries_to_object(&entries)));
        }
        Ok(())
    }
}

fn finish(context: AgentContext, agent: Option<AgentId>, budget: usize) -> AgentContext {
    let mut context = truncate(context, budget);
    if let Some(agent) = agent {
        context.metadata.insert("agent_id".into(), json!(agent));
    }
    context.metadata.insert("token_budget".into(), json!(budget));
    let tokens = context.estimated_tokens();
    context
        .metadata
        .insert("estimated_tokens".into(), json!(tokens));
    context
}

/// Drop nulls and empty lists from a freshly built tier object.
fn compact(value: Value) -> Map<String, Value> {
    let Value::Object(mut map) = value else {
        return Map::new();
    };
    map.retain(|_, v| match v {
        Value::Null => false,
        Value::Array(items) => !items.is_empty(),
        _ => true,
    });
    map
}

//! Domain entities as the orchestration core sees them.
//!
//! Projects, work orders, tasks, parties and teams are owned by the wider
//! platform. The core only ever reads immutable snapshots of them through a
//! [`DomainDirectory`], and refers to them with tagged [`EntityRef`]s.

use crate::error::ContextError;
use crate::ids::{PartyId, ProjectId, TaskId, TeamId, WorkOrderId};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// The kind half of a tagged entity reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Project,
    WorkOrder,
    Task,
    Party,
    Team,
    WorkflowRun,
    ChainRun,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Project => "project",
            Self::WorkOrder => "work_order",
            Self::Task => "task",
            Self::Party => "party",
            Self::Team => "team",
            Self::WorkflowRun => "workflow_run",
            Self::ChainRun => "chain_run",
        };
        f.write_str(s)
    }
}

/// A polymorphic (kind, id) pointer to an entity owned elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: Uuid,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: impl Into<Uuid>) -> Self {
        Self { kind, id: id.into() }
    }

    pub fn project(id: ProjectId) -> Self {
        Self::new(EntityKind::Project, id)
    }

    pub fn work_order(id: WorkOrderId) -> Self {
        Self::new(EntityKind::WorkOrder, id)
    }

    pub fn task(id: TaskId) -> Self {
        Self::new(EntityKind::Task, id)
    }

    pub fn party(id: PartyId) -> Self {
        Self::new(EntityKind::Party, id)
    }

    pub fn team(id: TeamId) -> Self {
        Self::new(EntityKind::Team, id)
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

// ── Snapshots ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamSnapshot {
    pub id: TeamId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactSnapshot {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// A client or other external party.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartySnapshot {
    pub id: PartyId,
    pub team_id: TeamId,
    pub name: String,
    #[serde(default = "default_party_kind")]
    pub kind: String,
    #[serde(default)]
    pub contacts: Vec<ContactSnapshot>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

fn default_party_kind() -> String {
    "client".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub id: ProjectId,
    pub team_id: TeamId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub party_id: Option<PartyId>,
    pub name: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl ProjectSnapshot {
    /// Whether the project still counts as active work for its client.
    pub fn is_active(&self) -> bool {
        !matches!(self.status.as_str(), "completed" | "cancelled" | "archived")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkOrderSnapshot {
    pub id: WorkOrderId,
    pub project_id: ProjectId,
    pub title: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_order_id: Option<WorkOrderId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
    pub title: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
}

impl TaskSnapshot {
    pub fn is_pending(&self) -> bool {
        !matches!(self.status.as_str(), "done" | "completed" | "cancelled")
    }
}

// ── Directory ─────────────────────────────────────────────────────────────

/// Read-only lookups into the platform's business entities.
///
/// The core never mutates anything it reads through this trait.
#[async_trait]
pub trait DomainDirectory: Send + Sync {
    async fn team(&self, id: TeamId) -> Result<Option<TeamSnapshot>, ContextError>;
    async fn party(&self, id: PartyId) -> Result<Option<PartySnapshot>, ContextError>;
    async fn project(&self, id: ProjectId) -> Result<Option<ProjectSnapshot>, ContextError>;
    async fn work_order(&self, id: WorkOrderId) -> Result<Option<WorkOrderSnapshot>, ContextError>;
    async fn task(&self, id: TaskId) -> Result<Option<TaskSnapshot>, ContextError>;

    /// Work orders of a project, most recent first.
    async fn project_work_orders(
        &self,
        project: ProjectId,
    ) -> Result<Vec<WorkOrderSnapshot>, ContextError>;

    /// All tasks of a project, across its work orders.
    async fn project_tasks(&self, project: ProjectId) -> Result<Vec<TaskSnapshot>, ContextError>;

    /// Projects belonging to a party.
    async fn party_projects(&self, party: PartyId) -> Result<Vec<ProjectSnapshot>, ContextError>;
}

/// A directory backed by in-process maps. Used by tests and the CLI fixture loader.
#[derive(Default)]
pub struct InMemoryDirectory {
    teams: RwLock<HashMap<TeamId, TeamSnapshot>>,
    parties: RwLock<HashMap<PartyId, PartySnapshot>>,
    projects: RwLock<Vec<ProjectSnapshot>>,
    work_orders: RwLock<Vec<WorkOrderSnapshot>>,
    tasks: RwLock<Vec<TaskSnapshot>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_team(&self, team: TeamSnapshot) {
        write(&self.teams).insert(team.id, team);
    }

    pub fn insert_party(&self, party: PartySnapshot) {
        write(&self.parties).insert(party.id, party);
    }

    pub fn insert_project(&self, project: ProjectSnapshot) {
        let mut projects = write(&self.projects);
        projects.retain(|p| p.id != project.id);
        projects.push(project);
    }

    pub fn insert_work_order(&self, work_order: WorkOrderSnapshot) {
        let mut work_orders = write(&self.work_orders);
        work_orders.retain(|w| w.id != work_order.id);
        work_orders.push(work_order);
    }

    pub fn insert_task(&self, task: TaskSnapshot) {
        let mut tasks = write(&self.tasks);
        tasks.retain(|t| t.id != task.id);
        tasks.push(task);
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl DomainDirectory for InMemoryDirectory {
    async fn team(&self, id: TeamId) -> Result<Option<TeamSnapshot>, ContextError> {
        Ok(read(&self.teams).get(&id).cloned())
    }

    async fn party(&self, id: PartyId) -> Result<Option<PartySnapshot>, ContextError> {
        Ok(read(&self.parties).get(&id).cloned())
    }

    async fn project(&self, id: ProjectId) -> Result<Option<ProjectSnapshot>, ContextError> {
        Ok(read(&self.projects).iter().find(|p| p.id == id).cloned())
    }

    async fn work_order(&self, id: WorkOrderId) -> Result<Option<WorkOrderSnapshot>, ContextError> {
        Ok(read(&self.work_orders).iter().find(|w| w.id == id).cloned())
    }

    async fn task(&self, id: TaskId) -> Result<Option<TaskSnapshot>, ContextError> {
        Ok(read(&self.tasks).iter().find(|t| t.id == id).cloned())
    }

    async fn project_work_orders(
        &self,
        project: ProjectId,
    ) -> Result<Vec<WorkOrderSnapshot>, ContextError> {
        // Insertion order stands in for recency: newest last, returned first.
        Ok(read(&self.work_orders)
            .iter()
            .rev()
            .filter(|w| w.project_id == project)
            .cloned()
            .collect())
    }

    async fn project_tasks(&self, project: ProjectId) -> Result<Vec<TaskSnapshot>, ContextError> {
        let work_orders: Vec<WorkOrderId> = read(&self.work_orders)
            .iter()
            .filter(|w| w.project_id == project)
            .map(|w| w.id)
            .collect();
        Ok(read(&self.tasks)
            .iter()
            .filter(|t| {
                t.project_id == Some(project)
                    || t.work_order_id.is_some_and(|w| work_orders.contains(&w))
            })
            .cloned()
            .collect())
    }

    async fn party_projects(&self, party: PartyId) -> Result<Vec<ProjectSnapshot>, ContextError> {
        Ok(read(&self.projects)
            .iter()
            .filter(|p| p.party_id == Some(party))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_ref_display() {
        let id = ProjectId::new();
        let r = EntityRef::project(id);
        assert_eq!(r.to_string(), format!("project:{id}"));
    }

    #[test]
    fn entity_ref_serializes_with_snake_case_kind() {
        let r = EntityRef::work_order(WorkOrderId::new());
        let json = serde_json::to_value(r).unwrap();
        assert_eq!(json["kind"], "work_order");
    }

    #[tokio::test]
    async fn project_tasks_follow_work_orders() {
        let dir = InMemoryDirectory::new();
        let team = TeamId::new();
        let project = ProjectSnapshot {
            id: ProjectId::new(),
            team_id: team,
            party_id: None,
            name: "Website relaunch".into(),
            status: "active".into(),
            description: None,
            due_date: None,
            tags: vec![],
            notes: None,
        };
        let wo = WorkOrderSnapshot {
            id: WorkOrderId::new(),
            project_id: project.id,
            title: "Design".into(),
            status: "open".into(),
            description: None,
            due_date: None,
        };
        dir.insert_task(TaskSnapshot {
            id: TaskId::new(),
            work_order_id: Some(wo.id),
            project_id: None,
            title: "Wireframes".into(),
            status: "todo".into(),
            due_date: None,
        });
        let project_id = project.id;
        dir.insert_project(project);
        dir.insert_work_order(wo);

        let tasks = dir.project_tasks(project_id).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "Wireframes");
    }

    #[test]
    fn project_activity() {
        let mut project = ProjectSnapshot {
            id: ProjectId::new(),
            team_id: TeamId::new(),
            party_id: None,
            name: "p".into(),
            status: "active".into(),
            description: None,
            due_date: None,
            tags: vec![],
            notes: None,
        };
        assert!(project.is_active());
        project.status = "archived".into();
        assert!(!project.is_active());
    }
}

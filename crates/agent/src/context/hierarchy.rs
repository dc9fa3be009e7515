//! Upward resolution of an anchor entity: task → work order → project →
//! party → team.

use foreman_core::entity::{
    DomainDirectory, EntityKind, EntityRef, PartySnapshot, ProjectSnapshot, TaskSnapshot,
    TeamSnapshot, WorkOrderSnapshot,
};
use foreman_core::error::ContextError;
use foreman_core::ids::{PartyId, ProjectId, TaskId, TeamId, WorkOrderId};

/// Everything above (and including) an anchor entity.
#[derive(Debug, Clone)]
pub struct ContextHierarchy {
    pub team: TeamSnapshot,
    pub party: Option<PartySnapshot>,
    pub project: Option<ProjectSnapshot>,
    pub work_order: Option<WorkOrderSnapshot>,
    pub task: Option<TaskSnapshot>,
}

fn unresolved(kind: &str, id: impl ToString) -> ContextError {
    ContextError::Unresolved {
        kind: kind.into(),
        id: id.to_string(),
    }
}

impl ContextHierarchy {
    /// Walk up from `anchor`. A missing anchor, or a missing entity that a
    /// present one links to, is an error. Tasks and projects may lack the
    /// optional link (work order, party) without failing.
    pub async fn resolve(
        directory: &dyn DomainDirectory,
        anchor: &EntityRef,
    ) -> Result<Self, ContextError> {
        match anchor.kind {
            EntityKind::Task => {
                let id = TaskId::from_uuid(anchor.id);
                let task = directory
                    .task(id)
                    .await?
                    .ok_or_else(|| unresolved("task", id))?;
                let work_order = match task.work_order_id {
                    Some(wo) => Some(
                        directory
                            .work_order(wo)
                            .await?
                            .ok_or_else(|| unresolved("work_order", wo))?,
                    ),
                    None => None,
                };
                let project_id = task
                    .project_id
                    .or(work_order.as_ref().map(|wo| wo.project_id))
                    .ok_or_else(|| unresolved("project for task", id))?;
                let mut hierarchy = Self::from_project(directory, project_id).await?;
                hierarchy.work_order = work_order;
                hierarchy.task = Some(task);
                Ok(hierarchy)
            }
            EntityKind::WorkOrder => {
                let id = WorkOrderId::from_uuid(anchor.id);
                let work_order = directory
                    .work_order(id)
                    .await?
                    .ok_or_else(|| unresolved("work_order", id))?;
                let mut hierarchy = Self::from_project(directory, work_order.project_id).await?;
                hierarchy.work_order = Some(work_order);
                Ok(hierarchy)
            }
            EntityKind::Project => Self::from_project(directory, ProjectId::from_uuid(anchor.id)).await,
            EntityKind::Party => {
                let party = Self::party(directory, PartyId::from_uuid(anchor.id)).await?;
                let team = Self::team(directory, party.team_id).await?;
                Ok(Self {
                    team,
                    party: Some(party),
                    project: None,
                    work_order: None,
                    task: None,
                })
            }
            EntityKind::Team => Ok(Self {
                team: Self::team(directory, TeamId::from_uuid(anchor.id)).await?,
                party: None,
                project: None,
                work_order: None,
                task: None,
            }),
            EntityKind::WorkflowRun | EntityKind::ChainRun => {
                Err(ContextError::UnsupportedEntity(anchor.kind.to_string()))
            }
        }
    }

    async fn from_project(
        directory: &dyn DomainDirectory,
        id: ProjectId,
    ) -> Result<Self, ContextError> {
        let project = directory
            .project(id)
            .await?
            .ok_or_else(|| unresolved("project", id))?;
        let party = match project.party_id {
            Some(party_id) => Some(Self::party(directory, party_id).await?),
            None => None,
        };
        let team = Self::team(directory, project.team_id).await?;
        Ok(Self {
            team,
            party,
            project: Some(project),
            work_order: None,
            task: None,
        })
    }

    async fn party(directory: &dyn DomainDirectory, id: PartyId) -> Result<PartySnapshot, ContextError> {
        directory.party(id).await?.ok_or_else(|| unresolved("party", id))
    }

    async fn team(directory: &dyn DomainDirectory, id: TeamId) -> Result<TeamSnapshot, ContextError> {
        directory.team(id).await?.ok_or_else(|| unresolved("team", id))
    }

    pub fn team_id(&self) -> TeamId {
        self.team.id
    }
}

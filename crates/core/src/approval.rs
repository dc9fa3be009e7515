//! Human approval: the inbox contract and team-level AI settings.

use crate::entity::EntityRef;
use crate::error::StoreError;
use crate::ids::{ApprovalRequestId, TeamId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    #[default]
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

/// What the core submits to the approval inbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewApprovalRequest {
    pub team_id: TeamId,
    pub title: String,
    pub preview: String,
    pub content: serde_json::Value,
    pub urgency: Urgency,
    /// Pointer back to the thing awaiting approval (a workflow run).
    pub subject: EntityRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: ApprovalRequestId,
    #[serde(flatten)]
    pub request: NewApprovalRequest,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<serde_json::Value>,
}

/// The approval inbox. Its lifecycle and UI live outside the core.
#[async_trait]
pub trait ApprovalInbox: Send + Sync {
    async fn create(&self, request: NewApprovalRequest) -> Result<ApprovalRequestId, StoreError>;

    async fn get(&self, id: ApprovalRequestId) -> Result<Option<ApprovalRequest>, StoreError>;

    /// Record a decision. Resolving an already resolved request is a no-op.
    async fn resolve(
        &self,
        id: ApprovalRequestId,
        approved: bool,
        resolution: serde_json::Value,
    ) -> Result<ApprovalRequest, StoreError>;
}

/// An inbox held in memory.
#[derive(Default)]
pub struct InMemoryApprovalInbox {
    requests: RwLock<HashMap<ApprovalRequestId, ApprovalRequest>>,
}

impl InMemoryApprovalInbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> Vec<ApprovalRequest> {
        let mut pending: Vec<ApprovalRequest> = self
            .requests
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .filter(|r| r.status == ApprovalStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.created_at);
        pending
    }
}

#[async_trait]
impl ApprovalInbox for InMemoryApprovalInbox {
    async fn create(&self, request: NewApprovalRequest) -> Result<ApprovalRequestId, StoreError> {
        let id = ApprovalRequestId::new();
        let record = ApprovalRequest {
            id,
            request,
            status: ApprovalStatus::Pending,
            created_at: Utc::now(),
            resolved_at: None,
            resolution: None,
        };
        self.requests
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id, record);
        Ok(id)
    }

    async fn get(&self, id: ApprovalRequestId) -> Result<Option<ApprovalRequest>, StoreError> {
        Ok(self
            .requests
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&id)
            .cloned())
    }

    async fn resolve(
        &self,
        id: ApprovalRequestId,
        approved: bool,
        resolution: serde_json::Value,
    ) -> Result<ApprovalRequest, StoreError> {
        let mut requests = self
            .requests
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let request = requests
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("approval request", id))?;
        if request.status == ApprovalStatus::Pending {
            request.status = if approved {
                ApprovalStatus::Approved
            } else {
                ApprovalStatus::Rejected
            };
            request.resolved_at = Some(Utc::now());
            request.resolution = Some(resolution);
        }
        Ok(request.clone())
    }
}

// ── Global AI settings ────────────────────────────────────────────────────

/// Team-wide AI settings, read-only to the core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalAiSettings {
    /// Action types that always require a human, whatever the agent may do.
    #[serde(default)]
    pub approval_required_actions: BTreeSet<String>,

    /// Minimum confidence for a suggestion to be approved without a human.
    /// `None` disables auto-approval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_approve_threshold: Option<f64>,
}

impl GlobalAiSettings {
    pub fn requires_approval(&self, action_type: &str) -> bool {
        self.approval_required_actions.contains(action_type)
    }
}

#[async_trait]
pub trait AiSettingsSource: Send + Sync {
    async fn settings(&self, team_id: TeamId) -> Result<GlobalAiSettings, StoreError>;
}

/// Settings per team from a map; unknown teams get the defaults.
#[derive(Default)]
pub struct StaticAiSettings {
    settings: RwLock<HashMap<TeamId, GlobalAiSettings>>,
}

impl StaticAiSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, team_id: TeamId, settings: GlobalAiSettings) {
        self.settings
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(team_id, settings);
    }
}

#[async_trait]
impl AiSettingsSource for StaticAiSettings {
    async fn settings(&self, team_id: TeamId) -> Result<GlobalAiSettings, StoreError> {
        Ok(self
            .settings
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&team_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::WorkflowRunId;

    fn request() -> NewApprovalRequest {
        NewApprovalRequest {
            team_id: TeamId::new(),
            title: "Send client update".into(),
            preview: "Weekly status for ACME".into(),
            content: serde_json::json!({"body": "..."}),
            urgency: Urgency::High,
            subject: EntityRef::new(crate::entity::EntityKind::WorkflowRun, WorkflowRunId::new()),
        }
    }

    #[tokio::test]
    async fn create_then_resolve() {
        let inbox = InMemoryApprovalInbox::new();
        let id = inbox.create(request()).await.unwrap();
        assert_eq!(inbox.pending().len(), 1);

        let resolved = inbox
            .resolve(id, true, serde_json::json!({"by": "pm"}))
            .await
            .unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Approved);
        assert!(inbox.pending().is_empty());
    }

    #[tokio::test]
    async fn second_resolution_is_ignored() {
        let inbox = InMemoryApprovalInbox::new();
        let id = inbox.create(request()).await.unwrap();
        inbox.resolve(id, false, serde_json::json!(null)).await.unwrap();
        let again = inbox.resolve(id, true, serde_json::json!(null)).await.unwrap();
        assert_eq!(again.status, ApprovalStatus::Rejected);
    }

    #[tokio::test]
    async fn resolving_unknown_request_fails() {
        let inbox = InMemoryApprovalInbox::new();
        let err = inbox
            .resolve(ApprovalRequestId::new(), true, serde_json::json!(null))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn unknown_team_gets_default_settings() {
        let source = StaticAiSettings::new();
        let settings = source.settings(TeamId::new()).await.unwrap();
        assert!(settings.approval_required_actions.is_empty());
        assert!(settings.auto_approve_threshold.is_none());
    }
}

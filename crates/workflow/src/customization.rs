//! Team-level customizations of workflow kinds.

use async_trait::async_trait;
use foreman_core::error::StoreError;
use foreman_core::ids::{CustomizationId, TeamId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowCustomization {
    pub id: CustomizationId,
    pub team_id: TeamId,
    pub kind: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Free-form overrides the workflow reads at run time.
    #[serde(default)]
    pub settings: serde_json::Value,
}

fn enabled_by_default() -> bool {
    true
}

#[async_trait]
pub trait CustomizationSource: Send + Sync {
    /// The customization for (team, kind), enabled or not.
    async fn customization(
        &self,
        team_id: TeamId,
        kind: &str,
    ) -> Result<Option<WorkflowCustomization>, StoreError>;
}

#[derive(Default)]
pub struct StaticCustomizations {
    entries: RwLock<HashMap<(TeamId, String), WorkflowCustomization>>,
}

impl StaticCustomizations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, customization: WorkflowCustomization) {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(
                (customization.team_id, customization.kind.clone()),
                customization,
            );
    }
}

#[async_trait]
impl CustomizationSource for StaticCustomizations {
    async fn customization(
        &self,
        team_id: TeamId,
        kind: &str,
    ) -> Result<Option<WorkflowCustomization>, StoreError> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&(team_id, kind.to_string()))
            .cloned())
    }
}

//! Agent configuration and budget state types.

use crate::error::StoreError;
use crate::ids::{AgentConfigId, AgentId, TeamId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

/// How an agent is configured within one team: permission flags,
/// per-tool overrides and its spend caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfiguration {
    pub id: AgentConfigId,
    pub team_id: TeamId,
    pub agent_id: AgentId,

    /// Display name of the agent persona
    pub name: String,

    /// Permission flags, e.g. `can_modify_tasks = true`. Missing flags are denied.
    #[serde(default)]
    pub permissions: BTreeMap<String, bool>,

    /// Per-tool grants or revocations; these win over category permissions.
    #[serde(default)]
    pub tool_overrides: BTreeMap<String, bool>,

    #[serde(default)]
    pub budget: BudgetState,
}

impl AgentConfiguration {
    pub fn new(team_id: TeamId, agent_id: AgentId, name: impl Into<String>) -> Self {
        Self {
            id: AgentConfigId::new(),
            team_id,
            agent_id,
            name: name.into(),
            permissions: BTreeMap::new(),
            tool_overrides: BTreeMap::new(),
            budget: BudgetState::default(),
        }
    }

    pub fn with_permission(mut self, flag: impl Into<String>, granted: bool) -> Self {
        self.permissions.insert(flag.into(), granted);
        self
    }

    pub fn with_tool_override(mut self, tool: impl Into<String>, allowed: bool) -> Self {
        self.tool_overrides.insert(tool.into(), allowed);
        self
    }

    pub fn with_budget(mut self, budget: BudgetState) -> Self {
        self.budget = budget;
        self
    }

    pub fn has_permission(&self, flag: &str) -> bool {
        self.permissions.get(flag).copied().unwrap_or(false)
    }

    pub fn tool_override(&self, tool: &str) -> Option<bool> {
        self.tool_overrides.get(tool).copied()
    }
}

/// Spend caps and counters of one agent configuration, in USD.
///
/// Both spend counters only ever increase; resetting them at day or month
/// boundaries is a scheduled job outside the core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetState {
    pub monthly_cap: f64,

    /// Daily cap. When absent the monthly cap bounds daily spend too.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_cap: Option<f64>,

    #[serde(default)]
    pub daily_spend: f64,

    #[serde(default)]
    pub current_month_spend: f64,
}

impl BudgetState {
    pub fn with_monthly_cap(monthly_cap: f64) -> Self {
        Self {
            monthly_cap,
            ..Self::default()
        }
    }

    pub fn daily_limit(&self) -> f64 {
        self.daily_cap.unwrap_or(self.monthly_cap)
    }

    pub fn remaining_daily(&self) -> f64 {
        (self.daily_limit() - self.daily_spend).max(0.0)
    }

    pub fn remaining_monthly(&self) -> f64 {
        (self.monthly_cap - self.current_month_spend).max(0.0)
    }

    /// Whether `cost` fits in both the daily and the monthly remainder.
    pub fn can_afford(&self, cost: f64) -> bool {
        self.denial_reason(cost).is_none()
    }

    /// Human-readable reason `cost` does not fit, daily checked first.
    pub fn denial_reason(&self, cost: f64) -> Option<String> {
        let daily = self.remaining_daily();
        if cost > daily {
            return Some(format!(
                "estimated cost ${cost:.4} exceeds remaining daily budget ${daily:.4}"
            ));
        }
        let monthly = self.remaining_monthly();
        if cost > monthly {
            return Some(format!(
                "estimated cost ${cost:.4} exceeds remaining monthly budget ${monthly:.4}"
            ));
        }
        None
    }

    /// Apply a deduction to both counters.
    pub fn record_spend(&mut self, cost: f64) {
        self.daily_spend += cost;
        self.current_month_spend += cost;
    }
}

/// Lookup of agent configurations by (team, agent).
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn configuration(
        &self,
        team_id: TeamId,
        agent_id: AgentId,
    ) -> Result<Option<AgentConfiguration>, StoreError>;
}

/// Agent configurations held in a map.
#[derive(Default)]
pub struct InMemoryAgentDirectory {
    configurations: RwLock<HashMap<(TeamId, AgentId), AgentConfiguration>>,
}

impl InMemoryAgentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, configuration: AgentConfiguration) {
        self.configurations
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert((configuration.team_id, configuration.agent_id), configuration);
    }
}

#[async_trait]
impl AgentDirectory for InMemoryAgentDirectory {
    async fn configuration(
        &self,
        team_id: TeamId,
        agent_id: AgentId,
    ) -> Result<Option<AgentConfiguration>, StoreError> {
        Ok(self
            .configurations
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&(team_id, agent_id))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_remaining_blocks_even_with_monthly_headroom() {
        let budget = BudgetState {
            monthly_cap: 100.0,
            daily_cap: None,
            daily_spend: 60.0,
            current_month_spend: 60.0,
        };
        assert!((budget.remaining_daily() - 40.0).abs() < 1e-9);
        assert!(!budget.can_afford(50.0));
        assert!(budget.denial_reason(50.0).unwrap().contains("daily"));
    }

    #[test]
    fn monthly_remaining_blocks() {
        let budget = BudgetState {
            monthly_cap: 100.0,
            daily_cap: Some(50.0),
            daily_spend: 0.0,
            current_month_spend: 95.0,
        };
        assert!(!budget.can_afford(10.0));
        assert!(budget.denial_reason(10.0).unwrap().contains("monthly"));
        assert!(budget.can_afford(5.0));
    }

    #[test]
    fn remaining_is_floored_at_zero() {
        let budget = BudgetState {
            monthly_cap: 10.0,
            daily_cap: None,
            daily_spend: 25.0,
            current_month_spend: 25.0,
        };
        assert_eq!(budget.remaining_daily(), 0.0);
        assert_eq!(budget.remaining_monthly(), 0.0);
        assert!(budget.can_afford(0.0));
    }

    #[test]
    fn missing_permission_is_denied() {
        let config = AgentConfiguration::new(TeamId::new(), AgentId::new(), "Planner")
            .with_permission("can_modify_tasks", true);
        assert!(config.has_permission("can_modify_tasks"));
        assert!(!config.has_permission("can_send_communications"));
    }

    #[tokio::test]
    async fn directory_lookup_is_team_scoped() {
        let dir = InMemoryAgentDirectory::new();
        let config = AgentConfiguration::new(TeamId::new(), AgentId::new(), "Planner");
        let (team, agent) = (config.team_id, config.agent_id);
        dir.insert(config);

        assert!(dir.configuration(team, agent).await.unwrap().is_some());
        assert!(dir.configuration(TeamId::new(), agent).await.unwrap().is_none());
    }
}

//! Chain fixtures: one TOML file with the team's agents, canned backend
//! responses, project snapshots and chain definitions.

use anyhow::Context;
use foreman_core::agent::{AgentConfiguration, BudgetState};
use foreman_core::entity::{EntityRef, ProjectSnapshot};
use foreman_core::ids::{AgentId, TeamId};
use foreman_workflow::{ChainCatalog, ChainDefinition};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct Fixture {
    #[serde(default = "TeamId::new")]
    pub team_id: TeamId,

    /// Accumulated context the chain starts from.
    #[serde(default)]
    pub seed: Value,

    #[serde(default)]
    pub trigger: Option<EntityRef>,

    /// Workflow kind → agent output.
    #[serde(default)]
    pub responses: BTreeMap<String, Value>,

    #[serde(default)]
    pub agents: Vec<FixtureAgent>,

    #[serde(default)]
    pub projects: Vec<ProjectSnapshot>,

    pub chains: Vec<ChainDefinition>,
}

#[derive(Debug, Deserialize)]
pub struct FixtureAgent {
    pub agent_id: AgentId,
    pub name: String,
    #[serde(default)]
    pub budget: BudgetState,
    #[serde(default)]
    pub permissions: BTreeMap<String, bool>,
}

impl Fixture {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid fixture {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn catalog(&self) -> anyhow::Result<ChainCatalog> {
        Ok(ChainCatalog::new(self.chains.clone())?)
    }

    pub fn configurations(&self) -> Vec<AgentConfiguration> {
        self.agents
            .iter()
            .map(|agent| {
                let mut configuration =
                    AgentConfiguration::new(self.team_id, agent.agent_id, &agent.name)
                        .with_budget(agent.budget.clone());
                configuration.permissions = agent.permissions.clone();
                configuration
            })
            .collect()
    }

    /// Steps naming an agent the fixture does not define, as
    /// `(chain, step)` pairs.
    pub fn unknown_agents(&self) -> Vec<(String, String)> {
        let known: BTreeSet<AgentId> = self.agents.iter().map(|a| a.agent_id).collect();
        self.chains
            .iter()
            .flat_map(|chain| {
                chain
                    .steps
                    .iter()
                    .filter(|step| step.agent_id.is_some_and(|id| !known.contains(&id)))
                    .map(|step| (chain.name.clone(), step.name.clone()))
            })
            .collect()
    }
}

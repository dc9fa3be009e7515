//! Chain definitions: the ordered step lists chains run through.

use super::branch::BranchRule;
use foreman_agent::context::OutputFilter;
use foreman_core::error::WorkflowError;
use foreman_core::ids::AgentId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Sequential,
    Parallel,
}

/// How a step's context is assembled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepContextConfig {
    /// Overrides the configured default token budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_budget: Option<usize>,
    /// Shaping of prior step outputs.
    #[serde(default, flatten)]
    pub filter: OutputFilter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainStep {
    pub name: String,

    /// Workflow kind to run. Steps without a kind and an agent emit their
    /// `input` as output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,

    /// Step input, layered over the chain's accumulated seed.
    #[serde(default)]
    pub input: Value,

    /// Expected spend in USD, checked against the agent's budget.
    #[serde(default)]
    pub estimated_cost: f64,

    #[serde(default)]
    pub context: StepContextConfig,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<BranchRule>,

    #[serde(default)]
    pub execution_mode: ExecutionMode,

    /// Parallel steps sharing a group tag are dispatched together.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_group: Option<String>,

    /// Approval action type of this step's output, e.g.
    /// `client_communication`. When the team's AI settings require it, the
    /// chain pauses for sign-off before the next step unless the output's
    /// `confidence` scores for auto-approval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_action: Option<String>,
}

impl ChainStep {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            workflow_kind: None,
            agent_id: None,
            input: Value::Null,
            estimated_cost: 0.0,
            context: StepContextConfig::default(),
            branches: Vec::new(),
            execution_mode: ExecutionMode::Sequential,
            step_group: None,
            approval_action: None,
        }
    }

    pub fn agent(mut self, workflow_kind: impl Into<String>, agent_id: AgentId) -> Self {
        self.workflow_kind = Some(workflow_kind.into());
        self.agent_id = Some(agent_id);
        self
    }

    pub fn input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn cost(mut self, estimated_cost: f64) -> Self {
        self.estimated_cost = estimated_cost;
        self
    }

    pub fn branch(mut self, rule: BranchRule) -> Self {
        self.branches.push(rule);
        self
    }

    pub fn requires_approval(mut self, action: impl Into<String>) -> Self {
        self.approval_action = Some(action.into());
        self
    }

    pub fn parallel(mut self, group: impl Into<String>) -> Self {
        self.execution_mode = ExecutionMode::Parallel;
        self.step_group = Some(group.into());
        self
    }

    /// The group tag when this step runs as part of a parallel group.
    pub fn parallel_group(&self) -> Option<&str> {
        match self.execution_mode {
            ExecutionMode::Parallel => self.step_group.as_deref(),
            ExecutionMode::Sequential => None,
        }
    }

    /// Whether the step runs an agent rather than emitting its input.
    pub fn runs_agent(&self) -> bool {
        self.workflow_kind.is_some() && self.agent_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub steps: Vec<ChainStep>,
}

impl ChainDefinition {
    pub fn new(name: impl Into<String>, steps: Vec<ChainStep>) -> Self {
        Self {
            name: name.into(),
            description: None,
            steps,
        }
    }

    pub fn step(&self, index: usize) -> Result<&ChainStep, WorkflowError> {
        self.steps.get(index).ok_or_else(|| WorkflowError::UnknownStep {
            chain: self.name.clone(),
            index,
        })
    }

    /// Indexes of the parallel steps tagged `group`, ascending.
    pub fn group_members(&self, group: &str) -> Vec<usize> {
        self.steps
            .iter()
            .enumerate()
            .filter(|(_, step)| step.parallel_group() == Some(group))
            .map(|(index, _)| index)
            .collect()
    }

    /// Structural checks: at least one step, agent steps fully specified,
    /// parallel steps tagged, parallel groups contiguous.
    ///
    /// A `goto` past the last step is allowed; taking it completes the run.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        let invalid = |reason: String| WorkflowError::InvalidChain {
            chain: self.name.clone(),
            reason,
        };

        if self.steps.is_empty() {
            return Err(invalid("chain has no steps".into()));
        }

        let mut seen_groups = BTreeSet::new();
        let mut previous_group: Option<&str> = None;
        for (index, step) in self.steps.iter().enumerate() {
            if step.workflow_kind.is_some() != step.agent_id.is_some() {
                return Err(invalid(format!(
                    "step {index} '{}' needs both a workflow kind and an agent, or neither",
                    step.name
                )));
            }

            if step.execution_mode == ExecutionMode::Parallel && step.step_group.is_none() {
                return Err(invalid(format!("parallel step {index} has no step_group")));
            }

            let group = step.parallel_group();
            if let Some(group) = group
                && previous_group != Some(group)
                && !seen_groups.insert(group)
            {
                return Err(invalid(format!("parallel group '{group}' is not contiguous")));
            }
            previous_group = group;
        }
        Ok(())
    }
}

/// The chain definitions known to an engine, by name.
#[derive(Debug, Clone, Default)]
pub struct ChainCatalog {
    chains: HashMap<String, ChainDefinition>,
}

impl ChainCatalog {
    pub fn new(definitions: Vec<ChainDefinition>) -> Result<Self, WorkflowError> {
        let mut chains = HashMap::new();
        for definition in definitions {
            definition.validate()?;
            let name = definition.name.clone();
            if chains.insert(name.clone(), definition).is_some() {
                return Err(WorkflowError::InvalidChain {
                    chain: name,
                    reason: "defined twice".into(),
                });
            }
        }
        Ok(Self { chains })
    }

    pub fn get(&self, name: &str) -> Result<&ChainDefinition, WorkflowError> {
        self.chains
            .get(name)
            .ok_or_else(|| WorkflowError::UnknownChain(name.into()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.chains.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

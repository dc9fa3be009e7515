//! Branch rules: which step runs after the current one.
//!
//! Rules are evaluated in order; the first whose condition is absent or
//! true decides. No match means "next index".

use foreman_core::chain::{ChainContext, Condition, ConditionEvaluator};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BranchAction {
    /// Jump over the next step.
    Skip,
    /// Jump to `target`, or the next step when absent.
    Goto {
        #[serde(default)]
        target: Option<usize>,
    },
    /// Stop the chain; it completes.
    Terminate,
    Continue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    pub action: BranchAction,
}

impl BranchRule {
    pub fn always(action: BranchAction) -> Self {
        Self {
            condition: None,
            action,
        }
    }

    pub fn when(condition: Condition, action: BranchAction) -> Self {
        Self {
            condition: Some(condition),
            action,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    Index(usize),
    Terminate,
}

pub fn evaluate_next_step(
    rules: &[BranchRule],
    current: usize,
    context: &ChainContext,
    evaluator: &dyn ConditionEvaluator,
) -> NextStep {
    let matched = rules.iter().find(|rule| {
        rule.condition
            .as_ref()
            .is_none_or(|condition| context.evaluate(condition, evaluator))
    });

    match matched.map(|rule| &rule.action) {
        Some(BranchAction::Skip) => NextStep::Index(current + 2),
        Some(BranchAction::Goto { target }) => NextStep::Index(target.unwrap_or(current + 1)),
        Some(BranchAction::Terminate) => NextStep::Terminate,
        Some(BranchAction::Continue) | None => NextStep::Index(current + 1),
    }
}

//! Approval policy: decides when a human has to sign off.
//!
//! A tool's category maps to an approval action type. When the team's AI
//! settings list that action type as approval-required the invocation is
//! refused, whatever permissions the agent holds.

use foreman_config::AppConfig;
use foreman_core::approval::GlobalAiSettings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Category → approval action type mapping, injected at construction.
#[derive(Debug, Clone, Default)]
pub struct ApprovalPolicy {
    category_actions: BTreeMap<String, String>,
}

impl ApprovalPolicy {
    pub fn new(category_actions: BTreeMap<String, String>) -> Self {
        Self { category_actions }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.approvals.clone())
    }

    pub fn action_for(&self, category: &str) -> Option<&str> {
        self.category_actions.get(category).map(String::as_str)
    }

    /// The action type that needs approval for this category, if any.
    pub fn required_approval<'a>(
        &'a self,
        settings: &GlobalAiSettings,
        category: &str,
    ) -> Option<&'a str> {
        self.action_for(category)
            .filter(|action| settings.requires_approval(action))
    }
}

/// An agent suggestion scored for auto-approval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    /// Model confidence in `[0, 1]`.
    pub confidence: f64,
    /// Spend the suggestion would commit, in USD.
    #[serde(default)]
    pub budget_impact: f64,
}

/// Whether a suggestion can skip the human.
///
/// Never for anything with a budget impact; never without a configured
/// threshold; otherwise when confidence reaches the threshold.
pub fn should_auto_approve(settings: &GlobalAiSettings, suggestion: &Suggestion) -> bool {
    if suggestion.budget_impact != 0.0 {
        return false;
    }
    settings
        .auto_approve_threshold
        .is_some_and(|threshold| suggestion.confidence >= threshold)
}

//! The assembled, transient context handed to an agent backend.

use super::token::estimate_value_tokens;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ── Types ───────────────────────────────────────────────────────────────────

/// Three tiers of JSON payload plus free metadata.
///
/// Tiers are JSON objects; an empty object means the tier had nothing to
/// contribute (or was truncated away).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentContext {
    /// Project tier: the anchor project, its work and prior step outputs.
    #[serde(default)]
    pub project: Map<String, Value>,

    /// Client tier: the owning party and its other active projects.
    #[serde(default)]
    pub client: Map<String, Value>,

    /// Org tier: the team.
    #[serde(default)]
    pub org: Map<String, Value>,

    /// Assembly annotations (anchor, budget, truncation flag). Never counted
    /// against the token budget.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Identifies one of the three tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Project,
    Client,
    Org,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Project, Tier::Client, Tier::Org];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Client => "client",
            Self::Org => "org",
        }
    }
}

// ── Implementation ──────────────────────────────────────────────────────────

impl AgentContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tier(&self, tier: Tier) -> &Map<String, Value> {
        match tier {
            Tier::Project => &self.project,
            Tier::Client => &self.client,
            Tier::Org => &self.org,
        }
    }

    pub fn tier_mut(&mut self, tier: Tier) -> &mut Map<String, Value> {
        match tier {
            Tier::Project => &mut self.project,
            Tier::Client => &mut self.client,
            Tier::Org => &mut self.org,
        }
    }

    /// Estimated tokens of one tier.
    pub fn tier_tokens(&self, tier: Tier) -> usize {
        map_tokens(self.tier(tier))
    }

    /// Sum of the three tiers' estimates.
    pub fn estimated_tokens(&self) -> usize {
        Tier::ALL.iter().map(|t| self.tier_tokens(*t)).sum()
    }

    /// True when no tier carries anything.
    pub fn is_empty(&self) -> bool {
        self.project.is_empty() && self.client.is_empty() && self.org.is_empty()
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// The whole context as one JSON document, the form a backend sends on.
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "project": self.project,
            "client": self.client,
            "org": self.org,
            "metadata": self.metadata,
        })
    }
}

pub(crate) fn map_tokens(map: &Map<String, Value>) -> usize {
    if map.is_empty() {
        return 0;
    }
    estimate_value_tokens(&Value::Object(map.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn empty_context_has_no_tokens() {
        let ctx = AgentContext::new();
        assert!(ctx.is_empty());
        assert_eq!(ctx.estimated_tokens(), 0);
    }

    #[test]
    fn metadata_is_not_counted() {
        let ctx = AgentContext::new().with_metadata("anchor", json!("x".repeat(400)));
        assert!(ctx.is_empty());
        assert_eq!(ctx.estimated_tokens(), 0);
    }

    #[test]
    fn tokens_sum_over_tiers() {
        let ctx = AgentContext {
            project: object(json!({"name": "Website"})),
            org: object(json!({"name": "Acme"})),
            ..AgentContext::default()
        };
        assert!(!ctx.is_empty());
        assert_eq!(
            ctx.estimated_tokens(),
            ctx.tier_tokens(Tier::Project) + ctx.tier_tokens(Tier::Org)
        );
        assert_eq!(ctx.tier_tokens(Tier::Client), 0);
    }
}

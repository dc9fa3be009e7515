//! Priority truncation of an [`AgentContext`] to a token budget.
//!
//! A context within budget is returned untouched. Otherwise each tier gets
//! a fixed share of the budget (project 3/6, client 2/6, org 1/6) and is
//! shrunk in stages until it fits its share:
//!
//! 1. drop low-value fields one at a time
//! 2. slice list fields to their first few entries
//! 3. keep only essential scalar fields
//! 4. empty the tier

use super::agent_context::{AgentContext, Tier, map_tokens};
use serde_json::{Map, Value};

/// Dropped in this order, re-checking the tier after each.
pub const DROPPABLE_FIELDS: [&str; 6] = [
    "memories",
    "tags",
    "notes",
    "statistics",
    "contacts",
    "chain_memories",
];

/// List fields cut down to [`SLICE_LIMIT`] entries.
pub const SLICEABLE_FIELDS: [&str; 4] = [
    "recent_work_orders",
    "pending_tasks",
    "active_projects",
    "previous_outputs",
];

pub const SLICE_LIMIT: usize = 3;

/// Scalar fields that survive the essentials stage.
pub const ESSENTIAL_FIELDS: [&str; 5] = ["id", "name", "title", "status", "kind"];

/// Token share of a tier, in sixths of the whole budget.
fn tier_budget(budget: usize, tier: Tier) -> usize {
    let sixths = match tier {
        Tier::Project => 3,
        Tier::Client => 2,
        Tier::Org => 1,
    };
    budget * sixths / 6
}

/// Shrink `context` so its estimate does not exceed `budget`.
///
/// Marks `metadata.truncated = true` when anything was cut.
pub fn truncate(mut context: AgentContext, budget: usize) -> AgentContext {
    let before = context.estimated_tokens();
    if before <= budget {
        return context;
    }

    for tier in Tier::ALL {
        let share = tier_budget(budget, tier);
        shrink_tier(context.tier_mut(tier), share);
    }

    let after = context.estimated_tokens();
    tracing::debug!(budget, before, after, "Context truncated");
    context.metadata.insert("truncated".into(), Value::Bool(true));
    context
}

fn shrink_tier(tier: &mut Map<String, Value>, budget: usize) {
    if map_tokens(tier) <= budget {
        return;
    }

    for field in DROPPABLE_FIELDS {
        if tier.remove(field).is_some() && map_tokens(tier) <= budget {
            return;
        }
    }

    for field in SLICEABLE_FIELDS {
        if let Some(Value::Array(items)) = tier.get_mut(field)
            && items.len() > SLICE_LIMIT
        {
            items.truncate(SLICE_LIMIT);
            if map_tokens(tier) <= budget {
                return;
            }
        }
    }

    tier.retain(|key, value| ESSENTIAL_FIELDS.contains(&key.as_str()) && is_scalar(value));
    if map_tokens(tier) <= budget {
        return;
    }

    tier.clear();
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

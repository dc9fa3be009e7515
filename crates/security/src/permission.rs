//! Permission policy: maps a tool's category to the permission flag an
//! agent configuration must hold before the tool may run.

use foreman_config::AppConfig;
use foreman_core::agent::AgentConfiguration;
use std::collections::BTreeMap;

/// Result of checking an agent configuration against the policy.
#[derive(Debug, Clone, PartialEq)]
pub enum PermissionDecision {
    Allowed,
    Denied { reason: String },
}

impl PermissionDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Category → permission flag mapping, injected at construction.
#[derive(Debug, Clone, Default)]
pub struct PermissionPolicy {
    category_flags: BTreeMap<String, String>,
}

impl PermissionPolicy {
    pub fn new(category_flags: BTreeMap<String, String>) -> Self {
        Self { category_flags }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.permissions.clone())
    }

    /// The flag required for a category, if the category is restricted.
    pub fn required_flag(&self, category: &str) -> Option<&str> {
        self.category_flags.get(category).map(String::as_str)
    }

    /// Check a tool invocation.
    ///
    /// Rules, in order:
    /// - A per-tool override on the configuration decides outright
    /// - A category with no mapping is unrestricted
    /// - Otherwise the configuration must hold the mapped flag
    pub fn check(
        &self,
        configuration: &AgentConfiguration,
        tool_name: &str,
        category: &str,
    ) -> PermissionDecision {
        if let Some(allowed) = configuration.tool_override(tool_name) {
            return if allowed {
                PermissionDecision::Allowed
            } else {
                PermissionDecision::Denied {
                    reason: format!("Tool '{tool_name}' is disabled for agent '{}'", configuration.name),
                }
            };
        }

        let Some(flag) = self.required_flag(category) else {
            return PermissionDecision::Allowed;
        };

        if configuration.has_permission(flag) {
            PermissionDecision::Allowed
        } else {
            PermissionDecision::Denied {
                reason: format!(
                    "Agent '{}' lacks permission '{flag}' required for {category} tools",
                    configuration.name
                ),
            }
        }
    }
}

//! Tool gateway — the single authorized path from an agent to a tool.
//!
//! Checks run in a fixed order and stop at the first refusal:
//!
//! 1. the tool must exist in the registry (else failure)
//! 2. the agent configuration must hold the category's permission
//! 3. the estimated cost must fit the remaining daily and monthly budget
//! 4. the team's AI settings must not require approval for the category
//!
//! Only then does the tool run. Every attempt, refused or not, produces a
//! [`ToolResult`] and exactly one activity record.

use foreman_core::activity::{ActivityKind, ActivityRecord, ActivitySink, ActivityStatus};
use foreman_core::agent::AgentConfiguration;
use foreman_core::approval::AiSettingsSource;
use foreman_core::tool::{ToolContext, ToolRegistry, ToolResult, ToolStatus};
use foreman_security::approval::ApprovalPolicy;
use foreman_security::permission::{PermissionDecision, PermissionPolicy};
use foreman_telemetry::ledger::BudgetLedger;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

pub struct ToolGateway {
    registry: ToolRegistry,
    permissions: PermissionPolicy,
    approvals: ApprovalPolicy,
    settings: Arc<dyn AiSettingsSource>,
    ledger: Option<Arc<dyn BudgetLedger>>,
    activity: Arc<dyn ActivitySink>,
}

impl ToolGateway {
    pub fn new(
        registry: ToolRegistry,
        permissions: PermissionPolicy,
        approvals: ApprovalPolicy,
        settings: Arc<dyn AiSettingsSource>,
        activity: Arc<dyn ActivitySink>,
    ) -> Self {
        Self {
            registry,
            permissions,
            approvals,
            settings,
            ledger: None,
            activity,
        }
    }

    /// Enable budget checks and deductions.
    pub fn with_ledger(mut self, ledger: Arc<dyn BudgetLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run a tool on behalf of an agent configuration.
    ///
    /// Never returns an error: refusals come back as `Denied`, unknown tools
    /// and tool errors as `Failure`.
    pub async fn execute(
        &self,
        configuration: &AgentConfiguration,
        tool_name: &str,
        params: serde_json::Value,
        estimated_cost: f64,
    ) -> ToolResult {
        let started = Instant::now();
        let result = self
            .authorize_and_run(configuration, tool_name, params.clone(), estimated_cost, started)
            .await;

        let charged = if result.is_success() { estimated_cost.max(0.0) } else { 0.0 };
        let mut record = ActivityRecord::new(
            ActivityKind::ToolInvocation,
            activity_status(result.status),
            configuration.team_id,
            tool_name,
            params,
        )
        .agent(configuration.agent_id)
        .usage(charged, 0)
        .duration_ms(result.duration_ms);
        if let Some(data) = &result.data {
            record = record.output(data.clone());
        }
        if let Some(err) = &result.error {
            record = record.error(err.clone());
        }
        self.activity.append(record).await;

        result
    }

    async fn authorize_and_run(
        &self,
        configuration: &AgentConfiguration,
        tool_name: &str,
        params: serde_json::Value,
        estimated_cost: f64,
        started: Instant,
    ) -> ToolResult {
        let elapsed = || started.elapsed().as_millis() as u64;

        // 1. Resolve
        let Some(tool) = self.registry.get(tool_name) else {
            warn!(tool = tool_name, "Unknown tool requested");
            return ToolResult::failure(tool_name, format!("Unknown tool: {tool_name}"), elapsed());
        };
        let category = tool.category().to_string();

        // 2. Permission
        if let PermissionDecision::Denied { reason } =
            self.permissions.check(configuration, tool_name, &category)
        {
            warn!(tool = tool_name, agent = %configuration.agent_id, %reason, "Tool denied: permission");
            return ToolResult::denied(tool_name, reason, elapsed());
        }

        // 3. Budget
        if let Some(ledger) = &self.ledger
            && estimated_cost > 0.0
        {
            match ledger.denial_reason(configuration.id, estimated_cost).await {
                Ok(None) => {}
                Ok(Some(reason)) => {
                    warn!(tool = tool_name, agent = %configuration.agent_id, %reason, "Tool denied: budget");
                    return ToolResult::denied(tool_name, reason, elapsed());
                }
                Err(e) => {
                    error!(tool = tool_name, error = %e, "Budget check failed");
                    return ToolResult::failure(tool_name, format!("Budget check failed: {e}"), elapsed());
                }
            }
        }

        // 4. Approval override
        let settings = match self.settings.settings(configuration.team_id).await {
            Ok(settings) => settings,
            Err(e) => {
                error!(tool = tool_name, error = %e, "Loading AI settings failed");
                return ToolResult::failure(tool_name, format!("AI settings unavailable: {e}"), elapsed());
            }
        };
        if let Some(action) = self.approvals.required_approval(&settings, &category) {
            let reason = format!(
                "Action '{action}' requires human approval for this team; '{tool_name}' was not run"
            );
            warn!(tool = tool_name, action, "Tool denied: approval required");
            return ToolResult::denied(tool_name, reason, elapsed());
        }

        // 5. Execute
        let context = ToolContext {
            team_id: configuration.team_id,
            agent_id: configuration.agent_id,
        };
        match tool.execute(&context, params).await {
            Ok(data) => {
                if let Some(ledger) = &self.ledger
                    && estimated_cost > 0.0
                    && let Err(e) = ledger.deduct_cost(configuration.id, estimated_cost).await
                {
                    error!(tool = tool_name, error = %e, "Deducting tool cost failed");
                }
                debug!(tool = tool_name, "Tool executed");
                ToolResult::success(tool_name, data, elapsed())
            }
            Err(e) => {
                error!(tool = tool_name, agent = %configuration.agent_id, error = %e, "Tool execution failed");
                ToolResult::failure(tool_name, e.to_string(), elapsed())
            }
        }
    }
}

fn activity_status(status: ToolStatus) -> ActivityStatus {
    match status {
        ToolStatus::Success => ActivityStatus::Success,
        ToolStatus::Failure => ActivityStatus::Failure,
        ToolStatus::Denied => ActivityStatus::Denied,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use foreman_config::AppConfig;
    use foreman_core::agent::BudgetState;
    use foreman_core::approval::{GlobalAiSettings, StaticAiSettings};
    use foreman_core::error::ToolError;
    use foreman_core::ids::{AgentId, TeamId};
    use foreman_core::tool::Tool;
    use foreman_telemetry::{ActivityLogger, InMemoryLedger};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTool {
        name: &'static str,
        category: &'static str,
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "test tool"
        }
        fn category(&self) -> &str {
            self.category
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        async fn execute(
            &self,
            _context: &ToolContext,
            params: serde_json::Value,
        ) -> Result<serde_json::Value, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ToolError::ExecutionFailed {
                    tool_name: self.name.into(),
                    reason: "upstream unavailable".into(),
                });
            }
            Ok(json!({"echo": params}))
        }
    }

    struct Harness {
        gateway: ToolGateway,
        activity: Arc<ActivityLogger>,
        ledger: Arc<InMemoryLedger>,
        settings: Arc<StaticAiSettings>,
        calls: Arc<AtomicUsize>,
        config: AgentConfiguration,
    }

    fn harness(budget: BudgetState) -> Harness {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        for (name, category, fail) in [
            ("create_task", "tasks", false),
            ("send_email", "communications", false),
            ("flaky", "utility", true),
        ] {
            registry.register(Arc::new(CountingTool {
                name,
                category,
                fail,
                calls: calls.clone(),
            }));
        }

        let app = AppConfig::default();
        let activity = Arc::new(ActivityLogger::new());
        let ledger = Arc::new(InMemoryLedger::new());
        let settings = Arc::new(StaticAiSettings::new());
        let config = AgentConfiguration::new(TeamId::new(), AgentId::new(), "Coordinator")
            .with_budget(budget.clone());
        ledger.set_budget(config.id, budget);

        let gateway = ToolGateway::new(
            registry,
            PermissionPolicy::from_config(&app),
            ApprovalPolicy::from_config(&app),
            settings.clone(),
            activity.clone(),
        )
        .with_ledger(ledger.clone());

        Harness {
            gateway,
            activity,
            ledger,
            settings,
            calls,
            config,
        }
    }

    #[tokio::test]
    async fn unknown_tool_fails_and_is_logged() {
        let h = harness(BudgetState::with_monthly_cap(10.0));
        let result = h.gateway.execute(&h.config, "nope", json!({}), 0.0).await;
        assert_eq!(result.status, ToolStatus::Failure);
        assert_eq!(h.activity.count(), 1);
    }

    #[tokio::test]
    async fn permission_denial_wins_over_budget_denial() {
        let h = harness(BudgetState::with_monthly_cap(1.0));
        let result = h.gateway.execute(&h.config, "create_task", json!({}), 50.0).await;

        assert!(result.is_denied());
        assert!(result.error.unwrap().contains("can_modify_tasks"));
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
        let entries = h.activity.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, ActivityStatus::Denied);
    }

    #[tokio::test]
    async fn budget_denial_blocks_execution() {
        let mut h = harness(BudgetState {
            monthly_cap: 100.0,
            daily_cap: None,
            daily_spend: 60.0,
            current_month_spend: 60.0,
        });
        h.config = h.config.clone().with_permission("can_modify_tasks", true);

        let result = h.gateway.execute(&h.config, "create_task", json!({}), 50.0).await;
        assert!(result.is_denied());
        assert!(result.error.unwrap().contains("daily"));
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn approval_setting_overrides_agent_permission() {
        let mut h = harness(BudgetState::with_monthly_cap(100.0));
        h.config = h.config.clone().with_permission("can_send_communications", true);
        h.settings.set(
            h.config.team_id,
            GlobalAiSettings {
                approval_required_actions: ["client_communication".to_string()].into(),
                auto_approve_threshold: None,
            },
        );

        let result = h.gateway.execute(&h.config, "send_email", json!({}), 1.0).await;
        assert!(result.is_denied());
        assert!(result.error.unwrap().contains("requires human approval"));
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn success_deducts_estimated_cost() {
        let mut h = harness(BudgetState::with_monthly_cap(100.0));
        h.config = h.config.clone().with_permission("can_modify_tasks", true);

        let result = h
            .gateway
            .execute(&h.config, "create_task", json!({"title": "Follow up"}), 2.0)
            .await;
        assert!(result.is_success());
        assert_eq!(result.data.unwrap()["echo"]["title"], "Follow up");

        let state = h.ledger.budget_state(h.config.id).await.unwrap();
        assert_eq!(state.daily_spend, 2.0);
        assert_eq!(h.activity.total_cost(), 2.0);
    }

    #[tokio::test]
    async fn zero_cost_skips_budget_check() {
        let mut h = harness(BudgetState::with_monthly_cap(0.0));
        h.config = h.config.clone().with_permission("can_modify_tasks", true);
        let result = h.gateway.execute(&h.config, "create_task", json!({}), 0.0).await;
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn tool_error_becomes_failure_without_charge() {
        let h = harness(BudgetState::with_monthly_cap(100.0));
        let result = h.gateway.execute(&h.config, "flaky", json!({}), 5.0).await;

        assert_eq!(result.status, ToolStatus::Failure);
        assert!(result.error.unwrap().contains("upstream unavailable"));
        assert_eq!(h.ledger.budget_state(h.config.id).await.unwrap().daily_spend, 0.0);
        assert_eq!(h.activity.entries_by_status(ActivityStatus::Failure).len(), 1);
    }
}

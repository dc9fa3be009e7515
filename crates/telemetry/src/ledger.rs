//! Budget ledger: per-agent-configuration spend tracking.
//!
//! `can_run` answers whether an estimated cost fits in both the remaining
//! daily and remaining monthly budget. `deduct_cost` increments both spend
//! counters as a single atomic unit so concurrent deductions accumulate.

use async_trait::async_trait;
use foreman_core::agent::BudgetState;
use foreman_core::error::BudgetError;
use foreman_core::ids::AgentConfigId;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, warn};

#[async_trait]
pub trait BudgetLedger: Send + Sync {
    /// Current caps and counters of a configuration.
    async fn budget_state(&self, config: AgentConfigId) -> Result<BudgetState, BudgetError>;

    /// Atomically add `cost` to both spend counters; returns the new state.
    async fn deduct_cost(&self, config: AgentConfigId, cost: f64) -> Result<BudgetState, BudgetError>;

    /// Whether `estimated_cost` fits in the remaining daily and monthly budget.
    async fn can_run(&self, config: AgentConfigId, estimated_cost: f64) -> Result<bool, BudgetError> {
        let state = self.budget_state(config).await?;
        let allowed = state.can_afford(estimated_cost);
        if !allowed {
            warn!(
                %config,
                estimated_cost,
                remaining_daily = state.remaining_daily(),
                remaining_monthly = state.remaining_monthly(),
                "Budget check failed"
            );
        }
        Ok(allowed)
    }

    /// The reason `estimated_cost` would be refused, if it would.
    async fn denial_reason(
        &self,
        config: AgentConfigId,
        estimated_cost: f64,
    ) -> Result<Option<String>, BudgetError> {
        Ok(self.budget_state(config).await?.denial_reason(estimated_cost))
    }
}

/// A ledger held in memory. Deductions happen under one write lock.
#[derive(Default)]
pub struct InMemoryLedger {
    budgets: RwLock<HashMap<AgentConfigId, BudgetState>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the budget of a configuration.
    pub fn set_budget(&self, config: AgentConfigId, state: BudgetState) {
        self.budgets
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(config, state);
    }
}

#[async_trait]
impl BudgetLedger for InMemoryLedger {
    async fn budget_state(&self, config: AgentConfigId) -> Result<BudgetState, BudgetError> {
        self.budgets
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&config)
            .cloned()
            .ok_or_else(|| BudgetError::UnknownConfiguration(config.to_string()))
    }

    async fn deduct_cost(&self, config: AgentConfigId, cost: f64) -> Result<BudgetState, BudgetError> {
        let mut budgets = self
            .budgets
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let state = budgets
            .get_mut(&config)
            .ok_or_else(|| BudgetError::UnknownConfiguration(config.to_string()))?;
        state.record_spend(cost);
        debug!(%config, cost, daily_spend = state.daily_spend, "Deducted cost");
        Ok(state.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ledger_with(state: BudgetState) -> (InMemoryLedger, AgentConfigId) {
        let ledger = InMemoryLedger::new();
        let id = AgentConfigId::new();
        ledger.set_budget(id, state);
        (ledger, id)
    }

    #[tokio::test]
    async fn daily_remaining_decides_even_with_monthly_headroom() {
        let (ledger, id) = ledger_with(BudgetState {
            monthly_cap: 100.0,
            daily_cap: None,
            daily_spend: 60.0,
            current_month_spend: 60.0,
        });
        assert!(!ledger.can_run(id, 50.0).await.unwrap());
        assert!(ledger.can_run(id, 40.0).await.unwrap());
    }

    #[tokio::test]
    async fn deduction_increments_both_counters() {
        let (ledger, id) = ledger_with(BudgetState::with_monthly_cap(10.0));
        let state = ledger.deduct_cost(id, 2.5).await.unwrap();
        assert_eq!(state.daily_spend, 2.5);
        assert_eq!(state.current_month_spend, 2.5);
    }

    #[tokio::test]
    async fn unknown_configuration_is_an_error() {
        let ledger = InMemoryLedger::new();
        let err = ledger.can_run(AgentConfigId::new(), 1.0).await.unwrap_err();
        assert!(matches!(err, BudgetError::UnknownConfiguration(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_deductions_accumulate_exactly() {
        let (ledger, id) = ledger_with(BudgetState::with_monthly_cap(1_000.0));
        let ledger = Arc::new(ledger);

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.deduct_cost(id, 0.5).await.unwrap() })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let state = ledger.budget_state(id).await.unwrap();
        assert_eq!(state.daily_spend, 25.0);
        assert_eq!(state.current_month_spend, 25.0);
    }

    #[tokio::test]
    async fn denial_reason_names_the_exhausted_window() {
        let (ledger, id) = ledger_with(BudgetState {
            monthly_cap: 100.0,
            daily_cap: Some(20.0),
            daily_spend: 0.0,
            current_month_spend: 90.0,
        });
        let reason = ledger.denial_reason(id, 15.0).await.unwrap().unwrap();
        assert!(reason.contains("monthly"));
    }
}

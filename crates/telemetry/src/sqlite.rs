//! SQLite budget ledger.
//!
//! Deductions are a single `UPDATE … SET spend = spend + ?` statement, so
//! concurrent writers accumulate without a read-modify-write race.

use crate::ledger::BudgetLedger;
use async_trait::async_trait;
use foreman_core::agent::BudgetState;
use foreman_core::error::BudgetError;
use foreman_core::ids::AgentConfigId;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

const DEFAULT_MAX_CONNECTIONS: u32 = 4;

pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Open (or create) a ledger at a sqlx SQLite URL.
    pub async fn new(url: &str) -> Result<Self, BudgetError> {
        Self::connect(url, DEFAULT_MAX_CONNECTIONS).await
    }

    /// Like [`Self::new`] with an explicit pool size (`database.max_connections`).
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, BudgetError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| BudgetError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| BudgetError::Storage(format!("Failed to open SQLite: {e}")))?;

        let ledger = Self { pool };
        ledger.run_migrations().await?;
        info!("SQLite budget ledger initialized at {url}");
        Ok(ledger)
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, BudgetError> {
        let ledger = Self { pool };
        ledger.run_migrations().await?;
        Ok(ledger)
    }

    async fn run_migrations(&self) -> Result<(), BudgetError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS agent_budgets (
                config_id            TEXT PRIMARY KEY,
                monthly_cap          REAL NOT NULL,
                daily_cap            REAL,
                daily_spend          REAL NOT NULL DEFAULT 0.0,
                current_month_spend  REAL NOT NULL DEFAULT 0.0
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| BudgetError::Storage(format!("agent_budgets table: {e}")))?;

        debug!("SQLite ledger migrations complete");
        Ok(())
    }

    /// Register or replace the budget of a configuration.
    pub async fn set_budget(&self, config: AgentConfigId, state: &BudgetState) -> Result<(), BudgetError> {
        sqlx::query(
            r#"
            INSERT INTO agent_budgets (config_id, monthly_cap, daily_cap, daily_spend, current_month_spend)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(config_id) DO UPDATE SET
                monthly_cap = excluded.monthly_cap,
                daily_cap = excluded.daily_cap,
                daily_spend = excluded.daily_spend,
                current_month_spend = excluded.current_month_spend
            "#,
        )
        .bind(config.to_string())
        .bind(state.monthly_cap)
        .bind(state.daily_cap)
        .bind(state.daily_spend)
        .bind(state.current_month_spend)
        .execute(&self.pool)
        .await
        .map_err(|e| BudgetError::Storage(format!("INSERT failed: {e}")))?;
        Ok(())
    }

    fn row_to_state(row: &sqlx::sqlite::SqliteRow) -> Result<BudgetState, BudgetError> {
        let column = |e: sqlx::Error| BudgetError::Storage(format!("budget row: {e}"));
        Ok(BudgetState {
            monthly_cap: row.try_get("monthly_cap").map_err(column)?,
            daily_cap: row.try_get("daily_cap").map_err(column)?,
            daily_spend: row.try_get("daily_spend").map_err(column)?,
            current_month_spend: row.try_get("current_month_spend").map_err(column)?,
        })
    }
}

#[async_trait]
impl BudgetLedger for SqliteLedger {
    async fn budget_state(&self, config: AgentConfigId) -> Result<BudgetState, BudgetError> {
        let row = sqlx::query("SELECT * FROM agent_budgets WHERE config_id = ?1")
            .bind(config.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BudgetError::Storage(format!("SELECT failed: {e}")))?
            .ok_or_else(|| BudgetError::UnknownConfiguration(config.to_string()))?;
        Self::row_to_state(&row)
    }

    async fn deduct_cost(&self, config: AgentConfigId, cost: f64) -> Result<BudgetState, BudgetError> {
        let row = sqlx::query(
            r#"
            UPDATE agent_budgets
            SET daily_spend = daily_spend + ?2,
                current_month_spend = current_month_spend + ?2
            WHERE config_id = ?1
            RETURNING *
            "#,
        )
        .bind(config.to_string())
        .bind(cost)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BudgetError::Storage(format!("UPDATE failed: {e}")))?
        .ok_or_else(|| BudgetError::UnknownConfiguration(config.to_string()))?;

        debug!(%config, cost, "Deducted cost");
        Self::row_to_state(&row)
    }
}

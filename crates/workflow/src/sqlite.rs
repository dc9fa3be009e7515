//! SQLite run store.
//!
//! Three tables with the same shape: an id, a parent (team for runs, chain
//! run for step records), a status column for queries, and the full record
//! as a JSON `body`. Updates run in a transaction: load, mutate, write,
//! commit.

use crate::chain::run::{ChainRun, ChainStepRecord};
use crate::run::WorkflowRun;
use crate::store::{Mutation, RunStore, Updated};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use foreman_core::error::StoreError;
use foreman_core::ids::{ChainRunId, StepRecordId, WorkflowRunId};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

const DEFAULT_MAX_CONNECTIONS: u32 = 4;

/// How a record type maps onto its table.
trait Persisted: Serialize + DeserializeOwned + Send {
    const TABLE: &'static str;
    const KIND: &'static str;

    fn key(&self) -> String;
    fn parent(&self) -> String;
    fn status_label(&self) -> &'static str;
}

impl Persisted for WorkflowRun {
    const TABLE: &'static str = "workflow_runs";
    const KIND: &'static str = "workflow run";

    fn key(&self) -> String {
        self.id.to_string()
    }
    fn parent(&self) -> String {
        self.team_id.to_string()
    }
    fn status_label(&self) -> &'static str {
        self.status().as_str()
    }
}

impl Persisted for ChainRun {
    const TABLE: &'static str = "chain_runs";
    const KIND: &'static str = "chain run";

    fn key(&self) -> String {
        self.id.to_string()
    }
    fn parent(&self) -> String {
        self.team_id.to_string()
    }
    fn status_label(&self) -> &'static str {
        self.status.as_str()
    }
}

impl Persisted for ChainStepRecord {
    const TABLE: &'static str = "chain_step_records";
    const KIND: &'static str = "chain step record";

    fn key(&self) -> String {
        self.id.to_string()
    }
    fn parent(&self) -> String {
        self.chain_run_id.to_string()
    }
    fn status_label(&self) -> &'static str {
        self.status.as_str()
    }
}

/// A persistent SQLite run store.
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    /// Open (or create) a store at a sqlx SQLite URL.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database (useful for tests).
    pub async fn new(url: &str) -> Result<Self, StoreError> {
        Self::connect(url, DEFAULT_MAX_CONNECTIONS).await
    }

    /// Like [`Self::new`] with an explicit pool size (`database.max_connections`).
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite run store initialized at {url}");
        Ok(store)
    }

    /// Create from an existing pool shared with other stores.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        for table in [
            WorkflowRun::TABLE,
            ChainRun::TABLE,
            ChainStepRecord::TABLE,
        ] {
            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    id          TEXT PRIMARY KEY,
                    parent_id   TEXT NOT NULL,
                    status      TEXT NOT NULL,
                    body        TEXT NOT NULL,
                    updated_at  TEXT NOT NULL
                )
                "#
            ))
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(format!("{table} table: {e}")))?;

            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_parent ON {table}(parent_id)"
            ))
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(format!("{table} index: {e}")))?;
        }

        debug!("SQLite run store migrations complete");
        Ok(())
    }

    async fn insert<T: Persisted>(&self, record: &T) -> Result<(), StoreError> {
        let body = encode(record)?;
        sqlx::query(&format!(
            "INSERT INTO {} (id, parent_id, status, body, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            T::TABLE
        ))
        .bind(record.key())
        .bind(record.parent())
        .bind(record.status_label())
        .bind(body)
        .bind(now())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("Insert into {} failed: {e}", T::TABLE)))?;
        Ok(())
    }

    async fn get<T: Persisted>(&self, id: String) -> Result<Option<T>, StoreError> {
        let row = sqlx::query(&format!("SELECT body FROM {} WHERE id = ?1", T::TABLE))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("Select from {} failed: {e}", T::TABLE)))?;
        row.map(|row| decode(&row, &id)).transpose()
    }

    async fn update<T: Persisted>(
        &self,
        id: String,
        mutate: Mutation<T>,
    ) -> Result<Updated<T>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("Begin transaction failed: {e}")))?;

        let row = sqlx::query(&format!("SELECT body FROM {} WHERE id = ?1", T::TABLE))
            .bind(id.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| StoreError::Storage(format!("Select from {} failed: {e}", T::TABLE)))?
            .ok_or_else(|| StoreError::not_found(T::KIND, &id))?;
        let mut value: T = decode(&row, &id)?;

        let changed = mutate(&mut value);
        if changed {
            sqlx::query(&format!(
                "UPDATE {} SET status = ?2, body = ?3, updated_at = ?4 WHERE id = ?1",
                T::TABLE
            ))
            .bind(id.as_str())
            .bind(value.status_label())
            .bind(encode(&value)?)
            .bind(now())
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Storage(format!("Update of {} failed: {e}", T::TABLE)))?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("Commit failed: {e}")))?;
        Ok(Updated { value, changed })
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn encode<T: Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Storage(format!("Encoding failed: {e}")))
}

fn decode<T: DeserializeOwned>(row: &sqlx::sqlite::SqliteRow, id: &str) -> Result<T, StoreError> {
    let body: String = row.try_get("body").map_err(|e| StoreError::Corrupt {
        id: id.to_string(),
        reason: format!("body column: {e}"),
    })?;
    serde_json::from_str(&body).map_err(|e| StoreError::Corrupt {
        id: id.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl RunStore for SqliteRunStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn insert_workflow_run(&self, run: &WorkflowRun) -> Result<(), StoreError> {
        self.insert(run).await
    }

    async fn workflow_run(&self, id: WorkflowRunId) -> Result<Option<WorkflowRun>, StoreError> {
        self.get(id.to_string()).await
    }

    async fn update_workflow_run(
        &self,
        id: WorkflowRunId,
        mutate: Mutation<WorkflowRun>,
    ) -> Result<Updated<WorkflowRun>, StoreError> {
        self.update(id.to_string(), mutate).await
    }

    async fn insert_chain_run(&self, run: &ChainRun) -> Result<(), StoreError> {
        self.insert(run).await
    }

    async fn chain_run(&self, id: ChainRunId) -> Result<Option<ChainRun>, StoreError> {
        self.get(id.to_string()).await
    }

    async fn update_chain_run(
        &self,
        id: ChainRunId,
        mutate: Mutation<ChainRun>,
    ) -> Result<Updated<ChainRun>, StoreError> {
        self.update(id.to_string(), mutate).await
    }

    async fn insert_step_record(&self, record: &ChainStepRecord) -> Result<(), StoreError> {
        self.insert(record).await
    }

    async fn step_records(&self, run: ChainRunId) -> Result<Vec<ChainStepRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT id, body FROM {} WHERE parent_id = ?1 ORDER BY rowid",
            ChainStepRecord::TABLE
        ))
        .bind(run.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("Step record query failed: {e}")))?;

        rows.iter()
            .map(|row| {
                let id: String = row
                    .try_get("id")
                    .map_err(|e| StoreError::Storage(format!("id column: {e}")))?;
                decode(row, &id)
            })
            .collect()
    }

    async fn update_step_record(
        &self,
        id: StepRecordId,
        mutate: Mutation<ChainStepRecord>,
    ) -> Result<Updated<ChainStepRecord>, StoreError> {
        self.update(id.to_string(), mutate).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::run::{ChainStatus, StepStatus};
    use crate::run::StateBag;
    use foreman_core::chain::ChainContext;
    use foreman_core::ids::TeamId;
    use serde_json::json;

    async fn test_store() -> SqliteRunStore {
        SqliteRunStore::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn pool_size_comes_from_the_caller() {
        let store = SqliteRunStore::connect("sqlite::memory:", 3).await.unwrap();
        assert_eq!(store.pool.options().get_max_connections(), 3);
        let default = test_store().await;
        assert_eq!(default.pool.options().get_max_connections(), DEFAULT_MAX_CONNECTIONS);
    }

    #[tokio::test]
    async fn workflow_run_round_trips() {
        let store = test_store().await;
        let run = WorkflowRun::new(
            TeamId::new(),
            None,
            "status_report",
            StateBag::new(json!({"project_id": "p-1"}), Some(json!({"tone": "brief"}))),
        );
        store.insert_workflow_run(&run).await.unwrap();
        let loaded = store.workflow_run(run.id).await.unwrap().unwrap();
        assert_eq!(loaded, run);
    }

    #[tokio::test]
    async fn update_commits_only_when_changed() {
        let store = test_store().await;
        let run = ChainRun::new(TeamId::new(), "weekly", ChainContext::default(), None);
        store.insert_chain_run(&run).await.unwrap();

        let skipped = store
            .update_chain_run(run.id, Box::new(|_| false))
            .await
            .unwrap();
        assert!(!skipped.changed);

        let paused = store
            .update_chain_run(
                run.id,
                Box::new(|r| {
                    r.status = ChainStatus::Paused;
                    true
                }),
            )
            .await
            .unwrap();
        assert!(paused.changed);
        let loaded = store.chain_run(run.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ChainStatus::Paused);
    }

    #[tokio::test]
    async fn step_records_are_scoped_and_ordered() {
        let store = test_store().await;
        let run = ChainRunId::new();
        let first = ChainStepRecord::running(run, 0);
        let second = ChainStepRecord::pending(run, 1);
        store.insert_step_record(&first).await.unwrap();
        store.insert_step_record(&second).await.unwrap();
        store
            .insert_step_record(&ChainStepRecord::pending(ChainRunId::new(), 0))
            .await
            .unwrap();

        store
            .update_step_record(
                first.id,
                Box::new(|r| {
                    r.complete(json!({"ok": true}));
                    true
                }),
            )
            .await
            .unwrap();

        let records = store.step_records(run).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].status, StepStatus::Completed);
        assert_eq!(records[1].id, second.id);
    }

    #[tokio::test]
    async fn missing_row_is_not_found() {
        let store = test_store().await;
        let err = store
            .update_chain_run(ChainRunId::new(), Box::new(|_| true))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }
}

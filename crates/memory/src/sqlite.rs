//! SQLite memory store.
//!
//! One table, `agent_memories`, unique on (team, scope, scope id, key).
//! Timestamps are stored as fixed-width RFC 3339 UTC strings so that expiry
//! comparisons can run in SQL.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use foreman_core::error::MemoryError;
use foreman_core::ids::{AgentId, MemoryEntryId, TeamId};
use foreman_core::memory::{MemoryAddress, MemoryEntry, MemoryScope, MemoryStore, StoreOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

const DEFAULT_MAX_CONNECTIONS: u32 = 4;

/// A persistent SQLite memory store.
pub struct SqliteMemoryStore {
    pool: SqlitePool,
}

impl SqliteMemoryStore {
    /// Open (or create) a store at a sqlx SQLite URL.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database (useful for tests).
    pub async fn new(url: &str) -> Result<Self, MemoryError> {
        Self::connect(url, DEFAULT_MAX_CONNECTIONS).await
    }

    /// Like [`Self::new`] with an explicit pool size (`database.max_connections`).
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, MemoryError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| MemoryError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite memory store initialized at {url}");
        Ok(store)
    }

    /// Create from an existing pool shared with other stores.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, MemoryError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), MemoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS agent_memories (
                id          TEXT PRIMARY KEY,
                team_id     TEXT NOT NULL,
                scope       TEXT NOT NULL,
                scope_id    TEXT NOT NULL,
                key         TEXT NOT NULL,
                value       TEXT NOT NULL,
                agent_id    TEXT,
                expires_at  TEXT,
                deleted_at  TEXT,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                UNIQUE (team_id, scope, scope_id, key)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("agent_memories table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_agent_memories_expires_at \
             ON agent_memories(expires_at) WHERE expires_at IS NOT NULL",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("expires_at index: {e}")))?;

        debug!("SQLite memory migrations complete");
        Ok(())
    }

    fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<MemoryEntry, MemoryError> {
        let text = |column: &str| -> Result<String, MemoryError> {
            row.try_get(column)
                .map_err(|e| MemoryError::QueryFailed(format!("{column} column: {e}")))
        };
        let optional = |column: &str| -> Result<Option<String>, MemoryError> {
            row.try_get(column)
                .map_err(|e| MemoryError::QueryFailed(format!("{column} column: {e}")))
        };

        let scope_raw = text("scope")?;
        let scope = MemoryScope::parse(&scope_raw)
            .ok_or_else(|| MemoryError::QueryFailed(format!("unknown scope '{scope_raw}'")))?;
        let value = serde_json::from_str(&text("value")?)
            .map_err(|e| MemoryError::QueryFailed(format!("value column: {e}")))?;

        Ok(MemoryEntry {
            id: MemoryEntryId::from_uuid(parse_uuid(&text("id")?)?),
            address: MemoryAddress::new(
                TeamId::from_uuid(parse_uuid(&text("team_id")?)?),
                scope,
                parse_uuid(&text("scope_id")?)?,
            ),
            key: text("key")?,
            value,
            agent_id: optional("agent_id")?
                .map(|s| parse_uuid(&s).map(AgentId::from_uuid))
                .transpose()?,
            expires_at: optional("expires_at")?.map(|s| parse_time(&s)).transpose()?,
            deleted_at: optional("deleted_at")?.map(|s| parse_time(&s)).transpose()?,
            created_at: parse_time(&text("created_at")?)?,
            updated_at: parse_time(&text("updated_at")?)?,
        })
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, MemoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MemoryError::QueryFailed(format!("timestamp '{raw}': {e}")))
}

fn parse_uuid(raw: &str) -> Result<Uuid, MemoryError> {
    Uuid::parse_str(raw).map_err(|e| MemoryError::QueryFailed(format!("uuid '{raw}': {e}")))
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn store(
        &self,
        address: &MemoryAddress,
        key: &str,
        value: serde_json::Value,
        options: StoreOptions,
    ) -> Result<MemoryEntry, MemoryError> {
        let now = Utc::now();
        let value_json = serde_json::to_string(&value)
            .map_err(|e| MemoryError::Storage(format!("Value serialization: {e}")))?;

        let row = sqlx::query(
            r#"
            INSERT INTO agent_memories
                (id, team_id, scope, scope_id, key, value, agent_id, expires_at, deleted_at, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, ?9, ?9)
            ON CONFLICT(team_id, scope, scope_id, key) DO UPDATE SET
                value = excluded.value,
                agent_id = excluded.agent_id,
                expires_at = excluded.expires_at,
                deleted_at = NULL,
                updated_at = excluded.updated_at
            RETURNING *
            "#,
        )
        .bind(MemoryEntryId::new().to_string())
        .bind(address.team_id.to_string())
        .bind(address.scope.as_str())
        .bind(address.scope_id.to_string())
        .bind(key)
        .bind(&value_json)
        .bind(options.agent_id.map(|a| a.to_string()))
        .bind(options.expires_at(now).map(timestamp))
        .bind(timestamp(now))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("UPSERT failed: {e}")))?;

        debug!(scope = %address.scope, key, "Stored memory");
        Self::row_to_entry(&row)
    }

    async fn retrieve(
        &self,
        address: &MemoryAddress,
        key: &str,
    ) -> Result<Option<serde_json::Value>, MemoryError> {
        let row = sqlx::query(
            r#"
            SELECT value FROM agent_memories
            WHERE team_id = ?1 AND scope = ?2 AND scope_id = ?3 AND key = ?4
              AND deleted_at IS NULL
              AND (expires_at IS NULL OR expires_at > ?5)
            "#,
        )
        .bind(address.team_id.to_string())
        .bind(address.scope.as_str())
        .bind(address.scope_id.to_string())
        .bind(key)
        .bind(timestamp(Utc::now()))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("Retrieve: {e}")))?;

        row.map(|r| {
            let raw: String = r
                .try_get("value")
                .map_err(|e| MemoryError::QueryFailed(format!("value column: {e}")))?;
            serde_json::from_str(&raw)
                .map_err(|e| MemoryError::QueryFailed(format!("value column: {e}")))
        })
        .transpose()
    }

    async fn forget(&self, address: &MemoryAddress, key: &str) -> Result<bool, MemoryError> {
        let now = timestamp(Utc::now());
        let result = sqlx::query(
            r#"
            UPDATE agent_memories SET deleted_at = ?5, updated_at = ?5
            WHERE team_id = ?1 AND scope = ?2 AND scope_id = ?3 AND key = ?4
              AND deleted_at IS NULL
              AND (expires_at IS NULL OR expires_at > ?5)
            "#,
        )
        .bind(address.team_id.to_string())
        .bind(address.scope.as_str())
        .bind(address.scope_id.to_string())
        .bind(key)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("Forget: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn entries(&self, address: &MemoryAddress) -> Result<Vec<MemoryEntry>, MemoryError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM agent_memories
            WHERE team_id = ?1 AND scope = ?2 AND scope_id = ?3
              AND deleted_at IS NULL
              AND (expires_at IS NULL OR expires_at > ?4)
            ORDER BY key
            "#,
        )
        .bind(address.team_id.to_string())
        .bind(address.scope.as_str())
        .bind(address.scope_id.to_string())
        .bind(timestamp(Utc::now()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("Entries: {e}")))?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn purge(&self, address: &MemoryAddress) -> Result<u64, MemoryError> {
        let result = sqlx::query(
            "DELETE FROM agent_memories WHERE team_id = ?1 AND scope = ?2 AND scope_id = ?3",
        )
        .bind(address.team_id.to_string())
        .bind(address.scope.as_str())
        .bind(address.scope_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("Purge: {e}")))?;

        Ok(result.rows_affected())
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, MemoryError> {
        let result = sqlx::query(
            "DELETE FROM agent_memories WHERE expires_at IS NOT NULL AND expires_at <= ?1",
        )
        .bind(timestamp(now))
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("Sweep: {e}")))?;

        let swept = result.rows_affected();
        if swept > 0 {
            info!(swept, "Swept expired memory entries");
        }
        Ok(swept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use foreman_core::ids::{ChainRunId, PartyId};
    use serde_json::json;

    async fn test_store() -> SqliteMemoryStore {
        SqliteMemoryStore::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn pool_size_comes_from_the_caller() {
        let store = SqliteMemoryStore::connect("sqlite::memory:", 2).await.unwrap();
        assert_eq!(store.pool.options().get_max_connections(), 2);

        let store = SqliteMemoryStore::connect("sqlite::memory:", 0).await.unwrap();
        assert_eq!(store.pool.options().get_max_connections(), 1);
    }

    async fn row_count(store: &SqliteMemoryStore) -> i64 {
        sqlx::query("SELECT COUNT(*) AS n FROM agent_memories")
            .fetch_one(&store.pool)
            .await
            .unwrap()
            .get("n")
    }

    #[tokio::test]
    async fn store_and_retrieve() {
        let db = test_store().await;
        let addr = MemoryAddress::client(TeamId::new(), PartyId::new());
        let agent = AgentId::new();
        let entry = db
            .store(&addr, "preferences", json!({"channel": "email"}), StoreOptions::by_agent(agent))
            .await
            .unwrap();
        assert_eq!(entry.agent_id, Some(agent));
        assert_eq!(entry.address, addr);

        let value = db.retrieve(&addr, "preferences").await.unwrap().unwrap();
        assert_eq!(value["channel"], "email");
    }

    #[tokio::test]
    async fn upsert_keeps_one_row_and_original_id() {
        let db = test_store().await;
        let addr = MemoryAddress::org(TeamId::new());
        let first = db.store(&addr, "k", json!(1), StoreOptions::default()).await.unwrap();
        let second = db.store(&addr, "k", json!(2), StoreOptions::default()).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.value, json!(2));
        assert_eq!(row_count(&db).await, 1);
    }

    #[tokio::test]
    async fn forget_tombstones_then_store_revives() {
        let db = test_store().await;
        let addr = MemoryAddress::org(TeamId::new());
        db.store(&addr, "k", json!("v"), StoreOptions::default()).await.unwrap();

        assert!(db.forget(&addr, "k").await.unwrap());
        assert!(!db.forget(&addr, "k").await.unwrap());
        assert!(!db.has(&addr, "k").await.unwrap());
        assert_eq!(row_count(&db).await, 1);

        let revived = db.store(&addr, "k", json!("again"), StoreOptions::default()).await.unwrap();
        assert!(revived.deleted_at.is_none());
        assert_eq!(db.retrieve(&addr, "k").await.unwrap(), Some(json!("again")));
    }

    #[tokio::test]
    async fn expiry_hides_then_sweep_deletes() {
        let db = test_store().await;
        let addr = MemoryAddress::org(TeamId::new());
        db.store(
            &addr,
            "stale",
            json!(true),
            StoreOptions::default().with_ttl(Duration::seconds(-5)),
        )
        .await
        .unwrap();
        db.store(&addr, "live", json!(true), StoreOptions::default().with_ttl_minutes(60))
            .await
            .unwrap();

        assert!(db.retrieve(&addr, "stale").await.unwrap().is_none());
        assert_eq!(db.entries(&addr).await.unwrap().len(), 1);

        assert_eq!(db.sweep_expired(Utc::now()).await.unwrap(), 1);
        assert_eq!(row_count(&db).await, 1);
    }

    #[tokio::test]
    async fn chain_memory_gone_after_purge() {
        let db = test_store().await;
        let team = TeamId::new();
        let run = ChainRunId::new();
        let addr = MemoryAddress::chain(team, run);
        db.store(&addr, "result", json!({"summary": "done"}), StoreOptions::default())
            .await
            .unwrap();
        assert_eq!(
            db.retrieve(&addr, "result").await.unwrap(),
            Some(json!({"summary": "done"}))
        );

        assert_eq!(db.purge(&addr).await.unwrap(), 1);
        assert!(db.chain_memories(team, run).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn entries_round_trip_all_columns() {
        let db = test_store().await;
        let addr = MemoryAddress::org(TeamId::new());
        db.store(&addr, "b", json!([1, 2]), StoreOptions::default().with_ttl_minutes(5))
            .await
            .unwrap();
        db.store(&addr, "a", json!(null), StoreOptions::default()).await.unwrap();

        let entries = db.entries(&addr).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, "a");
        assert_eq!(entries[1].value, json!([1, 2]));
        assert!(entries[1].expires_at.is_some());
    }
}

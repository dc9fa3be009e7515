//! Memory trait: scoped key/value persistence shared between agents.
//!
//! Every entry lives at exactly one [`MemoryAddress`]: a team plus one of
//! four scopes (project, client, org, chain run) and that scope's id.
//! Keys are unique per address. Entries may carry an absolute expiry and
//! are soft-deleted (tombstoned) by `forget`; a separate sweep hard-deletes
//! expired rows.

use crate::error::MemoryError;
use crate::ids::{AgentId, ChainRunId, MemoryEntryId, PartyId, ProjectId, TeamId};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The partition a memory entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryScope {
    Project,
    Client,
    Org,
    Chain,
}

impl MemoryScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Client => "client",
            Self::Org => "org",
            Self::Chain => "chain",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "project" => Some(Self::Project),
            "client" => Some(Self::Client),
            "org" => Some(Self::Org),
            "chain" => Some(Self::Chain),
            _ => None,
        }
    }
}

impl std::fmt::Display for MemoryScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// (team, scope, scope id): where a group of memory entries lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryAddress {
    pub team_id: TeamId,
    pub scope: MemoryScope,
    pub scope_id: Uuid,
}

impl MemoryAddress {
    pub fn new(team_id: TeamId, scope: MemoryScope, scope_id: Uuid) -> Self {
        Self {
            team_id,
            scope,
            scope_id,
        }
    }

    pub fn project(team_id: TeamId, project: ProjectId) -> Self {
        Self::new(team_id, MemoryScope::Project, project.as_uuid())
    }

    pub fn client(team_id: TeamId, party: PartyId) -> Self {
        Self::new(team_id, MemoryScope::Client, party.as_uuid())
    }

    /// Org scope is addressed by the team itself.
    pub fn org(team_id: TeamId) -> Self {
        Self::new(team_id, MemoryScope::Org, team_id.as_uuid())
    }

    pub fn chain(team_id: TeamId, run: ChainRunId) -> Self {
        Self::new(team_id, MemoryScope::Chain, run.as_uuid())
    }
}

/// A single persisted memory row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: MemoryEntryId,
    pub address: MemoryAddress,
    pub key: String,
    pub value: serde_json::Value,

    /// Agent that wrote the entry, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Tombstone set by `forget`. Tombstoned rows are invisible to reads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Visible to reads: neither tombstoned nor expired.
    pub fn is_visible(&self, now: DateTime<Utc>) -> bool {
        self.deleted_at.is_none() && !self.is_expired(now)
    }
}

/// Optional parameters of a `store` call.
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    pub agent_id: Option<AgentId>,
    pub ttl: Option<Duration>,
}

impl StoreOptions {
    pub fn by_agent(agent_id: AgentId) -> Self {
        Self {
            agent_id: Some(agent_id),
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_ttl_minutes(self, minutes: i64) -> Self {
        self.with_ttl(Duration::minutes(minutes))
    }

    /// Absolute expiry computed at write time.
    pub fn expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.ttl.map(|ttl| now + ttl)
    }
}

/// The core memory store trait.
///
/// Implementations: in-memory (tests, ephemeral sessions) and SQLite.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// Upsert a value. Revives a tombstoned key.
    async fn store(
        &self,
        address: &MemoryAddress,
        key: &str,
        value: serde_json::Value,
        options: StoreOptions,
    ) -> Result<MemoryEntry, MemoryError>;

    /// Read a visible value.
    async fn retrieve(
        &self,
        address: &MemoryAddress,
        key: &str,
    ) -> Result<Option<serde_json::Value>, MemoryError>;

    /// Tombstone a key. Returns whether a visible entry was forgotten.
    async fn forget(&self, address: &MemoryAddress, key: &str) -> Result<bool, MemoryError>;

    /// Whether a visible value exists for the key.
    async fn has(&self, address: &MemoryAddress, key: &str) -> Result<bool, MemoryError> {
        Ok(self.retrieve(address, key).await?.is_some())
    }

    /// All visible entries at an address, ordered by key.
    async fn entries(&self, address: &MemoryAddress) -> Result<Vec<MemoryEntry>, MemoryError>;

    /// Hard-delete every row at an address, tombstoned or not.
    async fn purge(&self, address: &MemoryAddress) -> Result<u64, MemoryError>;

    /// Hard-delete every row whose expiry is at or before `now`.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, MemoryError>;

    /// Visible chain-scoped entries of a chain run.
    async fn chain_memories(
        &self,
        team_id: TeamId,
        run: ChainRunId,
    ) -> Result<Vec<MemoryEntry>, MemoryError> {
        self.entries(&MemoryAddress::chain(team_id, run)).await
    }
}

/// Collapse entries into a `{key: value}` JSON object.
pub fn entries_to_object(entries: &[MemoryEntry]) -> serde_json::Map<String, serde_json::Value> {
    entries
        .iter()
        .map(|e| (e.key.clone(), e.value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(expires_at: Option<DateTime<Utc>>) -> MemoryEntry {
        let now = Utc::now();
        MemoryEntry {
            id: MemoryEntryId::new(),
            address: MemoryAddress::org(TeamId::new()),
            key: "tone".into(),
            value: serde_json::json!("formal"),
            agent_id: None,
            expires_at,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn scope_round_trips_through_str() {
        for scope in [
            MemoryScope::Project,
            MemoryScope::Client,
            MemoryScope::Org,
            MemoryScope::Chain,
        ] {
            assert_eq!(MemoryScope::parse(scope.as_str()), Some(scope));
        }
        assert_eq!(MemoryScope::parse("global"), None);
    }

    #[test]
    fn expiry_hides_entry() {
        let now = Utc::now();
        assert!(entry(None).is_visible(now));
        assert!(entry(Some(now + Duration::minutes(5))).is_visible(now));
        assert!(!entry(Some(now - Duration::minutes(5))).is_visible(now));
    }

    #[test]
    fn tombstone_hides_entry() {
        let mut e = entry(None);
        e.deleted_at = Some(Utc::now());
        assert!(!e.is_visible(Utc::now()));
    }

    #[test]
    fn ttl_becomes_absolute_expiry() {
        let now = Utc::now();
        let opts = StoreOptions::default().with_ttl_minutes(30);
        assert_eq!(opts.expires_at(now), Some(now + Duration::minutes(30)));
        assert_eq!(StoreOptions::default().expires_at(now), None);
    }

    #[test]
    fn org_address_uses_team_id() {
        let team = TeamId::new();
        let addr = MemoryAddress::org(team);
        assert_eq!(addr.scope_id, team.as_uuid());
        assert_eq!(addr.scope, MemoryScope::Org);
    }
}

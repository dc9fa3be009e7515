//! In-memory store: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use foreman_core::error::MemoryError;
use foreman_core::ids::MemoryEntryId;
use foreman_core::memory::{MemoryAddress, MemoryEntry, MemoryStore, StoreOptions};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

type Slot = (MemoryAddress, String);

/// A store that keeps entries in a map keyed by (address, key).
/// Tombstoned rows stay in the map until purged or swept.
pub struct InMemoryStore {
    entries: Arc<RwLock<HashMap<Slot, MemoryEntry>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of rows held, tombstones and expired rows included.
    pub async fn row_count(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn store(
        &self,
        address: &MemoryAddress,
        key: &str,
        value: serde_json::Value,
        options: StoreOptions,
    ) -> Result<MemoryEntry, MemoryError> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let entry = entries
            .entry((*address, key.to_string()))
            .and_modify(|existing| {
                existing.value = value.clone();
                existing.agent_id = options.agent_id;
                existing.expires_at = options.expires_at(now);
                existing.deleted_at = None;
                existing.updated_at = now;
            })
            .or_insert_with(|| MemoryEntry {
                id: MemoryEntryId::new(),
                address: *address,
                key: key.to_string(),
                value: value.clone(),
                agent_id: options.agent_id,
                expires_at: options.expires_at(now),
                deleted_at: None,
                created_at: now,
                updated_at: now,
            });
        Ok(entry.clone())
    }

    async fn retrieve(
        &self,
        address: &MemoryAddress,
        key: &str,
    ) -> Result<Option<serde_json::Value>, MemoryError> {
        let now = Utc::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(&(*address, key.to_string()))
            .filter(|e| e.is_visible(now))
            .map(|e| e.value.clone()))
    }

    async fn forget(&self, address: &MemoryAddress, key: &str) -> Result<bool, MemoryError> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        match entries.get_mut(&(*address, key.to_string())) {
            Some(entry) if entry.is_visible(now) => {
                entry.deleted_at = Some(now);
                entry.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn entries(&self, address: &MemoryAddress) -> Result<Vec<MemoryEntry>, MemoryError> {
        let now = Utc::now();
        let entries = self.entries.read().await;
        let mut visible: Vec<MemoryEntry> = entries
            .values()
            .filter(|e| e.address == *address && e.is_visible(now))
            .cloned()
            .collect();
        visible.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(visible)
    }

    async fn purge(&self, address: &MemoryAddress) -> Result<u64, MemoryError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|(slot_address, _), _| slot_address != address);
        Ok((before - entries.len()) as u64)
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, MemoryError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        Ok((before - entries.len()) as u64)
    }
}

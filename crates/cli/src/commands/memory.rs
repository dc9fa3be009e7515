//! `foreman memory` — memory maintenance.

use chrono::Utc;
use foreman_config::AppConfig;
use foreman_core::memory::MemoryStore;
use foreman_memory::SqliteMemoryStore;

pub async fn sweep(config: &AppConfig, db: Option<&str>) -> anyhow::Result<()> {
    let url = db.unwrap_or(&config.database.url);
    let store = SqliteMemoryStore::connect(url, config.database.max_connections).await?;
    let removed = store.sweep_expired(Utc::now()).await?;
    println!("🧹 Swept {removed} expired memory entries from {url}");
    Ok(())
}

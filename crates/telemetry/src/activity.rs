//! Activity logging: the append-only record of agent runs, chain steps
//! and tool invocations.

use async_trait::async_trait;
use foreman_core::activity::{ActivityKind, ActivityRecord, ActivitySink, ActivityStatus};
use std::sync::{Arc, Mutex};

/// Activity logger that keeps records in memory and forwards each one to
/// its sinks. Useful for testing and small deployments.
pub struct ActivityLogger {
    entries: Mutex<Vec<ActivityRecord>>,
    sinks: Vec<Arc<dyn ActivitySink>>,
}

impl std::fmt::Debug for ActivityLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityLogger")
            .field("entry_count", &self.count())
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

impl Default for ActivityLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityLogger {
    /// Create a new logger with no sinks.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            sinks: Vec::new(),
        }
    }

    /// Create a new logger with the given sinks.
    pub fn with_sinks(sinks: Vec<Arc<dyn ActivitySink>>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            sinks,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ActivityRecord>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// All recorded entries, oldest first.
    pub fn entries(&self) -> Vec<ActivityRecord> {
        self.lock().clone()
    }

    pub fn entries_by_kind(&self, kind: ActivityKind) -> Vec<ActivityRecord> {
        self.lock().iter().filter(|e| e.kind == kind).cloned().collect()
    }

    pub fn entries_by_status(&self, status: ActivityStatus) -> Vec<ActivityRecord> {
        self.lock()
            .iter()
            .filter(|e| e.status == status)
            .cloned()
            .collect()
    }

    /// Total recorded cost, for budget reconciliation.
    pub fn total_cost(&self) -> f64 {
        self.lock().iter().map(|e| e.cost).sum()
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }
}

#[async_trait]
impl ActivitySink for ActivityLogger {
    async fn append(&self, record: ActivityRecord) {
        self.lock().push(record.clone());

        for sink in &self.sinks {
            sink.append(record.clone()).await;
        }
    }
}

/// A sink that writes records as `tracing` events.
pub struct TracingActivitySink;

#[async_trait]
impl ActivitySink for TracingActivitySink {
    async fn append(&self, record: ActivityRecord) {
        tracing::info!(
            kind = ?record.kind,
            status = ?record.status,
            team = %record.team_id,
            subject = %record.subject,
            cost = record.cost,
            tokens = record.tokens,
            duration_ms = record.duration_ms,
            error = ?record.error,
            "ACTIVITY"
        );
    }
}

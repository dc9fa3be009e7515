//! Run persistence: workflow runs, chain runs and step records.
//!
//! Every mutation goes through an `update_*` call that loads the row,
//! applies a closure and writes it back as one atomic unit. The closure
//! returns `false` to leave the row untouched (a no-op transition).

use crate::chain::run::{ChainRun, ChainStepRecord};
use crate::run::WorkflowRun;
use async_trait::async_trait;
use foreman_core::error::StoreError;
use foreman_core::ids::{ChainRunId, StepRecordId, WorkflowRunId};
use std::collections::HashMap;
use std::sync::RwLock;

/// A read-modify-write applied inside the store's critical section.
pub type Mutation<T> = Box<dyn FnOnce(&mut T) -> bool + Send>;

/// The row after an update and whether the closure changed it.
#[derive(Debug, Clone)]
pub struct Updated<T> {
    pub value: T,
    pub changed: bool,
}

#[async_trait]
pub trait RunStore: Send + Sync {
    fn name(&self) -> &str;

    async fn insert_workflow_run(&self, run: &WorkflowRun) -> Result<(), StoreError>;
    async fn workflow_run(&self, id: WorkflowRunId) -> Result<Option<WorkflowRun>, StoreError>;
    async fn update_workflow_run(
        &self,
        id: WorkflowRunId,
        mutate: Mutation<WorkflowRun>,
    ) -> Result<Updated<WorkflowRun>, StoreError>;

    async fn insert_chain_run(&self, run: &ChainRun) -> Result<(), StoreError>;
    async fn chain_run(&self, id: ChainRunId) -> Result<Option<ChainRun>, StoreError>;
    async fn update_chain_run(
        &self,
        id: ChainRunId,
        mutate: Mutation<ChainRun>,
    ) -> Result<Updated<ChainRun>, StoreError>;

    async fn insert_step_record(&self, record: &ChainStepRecord) -> Result<(), StoreError>;
    /// Records of a chain run in insertion order.
    async fn step_records(&self, run: ChainRunId) -> Result<Vec<ChainStepRecord>, StoreError>;
    async fn update_step_record(
        &self,
        id: StepRecordId,
        mutate: Mutation<ChainStepRecord>,
    ) -> Result<Updated<ChainStepRecord>, StoreError>;
}

/// Runs held in memory. Each update happens under one write lock.
#[derive(Default)]
pub struct InMemoryRunStore {
    workflows: RwLock<HashMap<WorkflowRunId, WorkflowRun>>,
    chains: RwLock<HashMap<ChainRunId, ChainRun>>,
    records: RwLock<Vec<ChainStepRecord>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply<T: Clone>(row: &mut T, mutate: Mutation<T>) -> Updated<T> {
    let mut next = row.clone();
    let changed = mutate(&mut next);
    if changed {
        *row = next;
    }
    Updated {
        value: row.clone(),
        changed,
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn insert_workflow_run(&self, run: &WorkflowRun) -> Result<(), StoreError> {
        self.workflows
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(run.id, run.clone());
        Ok(())
    }

    async fn workflow_run(&self, id: WorkflowRunId) -> Result<Option<WorkflowRun>, StoreError> {
        Ok(self
            .workflows
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&id)
            .cloned())
    }

    async fn update_workflow_run(
        &self,
        id: WorkflowRunId,
        mutate: Mutation<WorkflowRun>,
    ) -> Result<Updated<WorkflowRun>, StoreError> {
        let mut runs = self
            .workflows
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let run = runs
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("workflow run", id))?;
        Ok(apply(run, mutate))
    }

    async fn insert_chain_run(&self, run: &ChainRun) -> Result<(), StoreError> {
        self.chains
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(run.id, run.clone());
        Ok(())
    }

    async fn chain_run(&self, id: ChainRunId) -> Result<Option<ChainRun>, StoreError> {
        Ok(self
            .chains
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&id)
            .cloned())
    }

    async fn update_chain_run(
        &self,
        id: ChainRunId,
        mutate: Mutation<ChainRun>,
    ) -> Result<Updated<ChainRun>, StoreError> {
        let mut runs = self
            .chains
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let run = runs
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("chain run", id))?;
        Ok(apply(run, mutate))
    }

    async fn insert_step_record(&self, record: &ChainStepRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record.clone());
        Ok(())
    }

    async fn step_records(&self, run: ChainRunId) -> Result<Vec<ChainStepRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|r| r.chain_run_id == run)
            .cloned()
            .collect())
    }

    async fn update_step_record(
        &self,
        id: StepRecordId,
        mutate: Mutation<ChainStepRecord>,
    ) -> Result<Updated<ChainStepRecord>, StoreError> {
        let mut records = self
            .records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::not_found("chain step record", id))?;
        Ok(apply(record, mutate))
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

    #[tokio::test]
    async fn declined_mutation_leaves_row_alone() {
        let store = InMemoryRunStore::new();
        let run = ChainRun::new(TeamId::new(), "weekly", ChainContext::default(), None);
        store.insert_chain_run(&run).await.unwrap();

        let updated = store
            .update_chain_run(
                run.id,
                Box::new(|r| {
                    r.status = ChainStatus::Failed;
                    false
                }),
            )
            .await
            .unwrap();
        assert!(!updated.changed);
        assert_eq!(updated.value.status, ChainStatus::Running);
        assert_eq!(store.chain_run(run.id).await.unwrap().unwrap().status, ChainStatus::Running);
    }

    #[tokio::test]
    async fn records_keep_insertion_order() {
        let store = InMemoryRunStore::new();
        let run = ChainRunId::new();
        for index in [2, 0, 1] {
            store
                .insert_step_record(&ChainStepRecord::pending(run, index))
                .await
                .unwrap();
        }
        store
            .insert_step_record(&ChainStepRecord::pending(ChainRunId::new(), 0))
            .await
            .unwrap();

        let records = store.step_records(run).await.unwrap();
        let indexes: Vec<usize> = records.iter().map(|r| r.step_index).collect();
        assert_eq!(indexes, [2, 0, 1]);

        let updated = store
            .update_step_record(
                records[1].id,
                Box::new(|r| {
                    r.complete(json!("ok"));
                    true
                }),
            )
            .await
            .unwrap();
        assert_eq!(updated.value.status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let store = InMemoryRunStore::new();
        let err = store
            .update_workflow_run(WorkflowRunId::new(), Box::new(|_| true))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));

        let run = WorkflowRun::new(TeamId::new(), None, "triage", StateBag::default());
        store.insert_workflow_run(&run).await.unwrap();
        assert!(store.workflow_run(run.id).await.unwrap().is_some());
    }
}

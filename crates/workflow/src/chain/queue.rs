//! Job queue seam for parallel step groups.
//!
//! The engine hands a named batch of step jobs to a [`JobQueue`]; whoever
//! consumes the queue calls back into
//! [`ChainEngine::execute_dispatched_step`](super::ChainEngine::execute_dispatched_step)
//! once per job and then
//! [`ChainEngine::complete_parallel_group`](super::ChainEngine::complete_parallel_group).

use async_trait::async_trait;
use foreman_core::error::WorkflowError;
use foreman_core::ids::{ChainRunId, StepRecordId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// One step of a parallel group, to run independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepJob {
    pub chain_run_id: ChainRunId,
    pub step_index: usize,
    pub record_id: StepRecordId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobBatch {
    /// `chain:{run}:{group}`
    pub name: String,
    pub chain_run_id: ChainRunId,
    pub group: String,
    pub jobs: Vec<StepJob>,
}

impl JobBatch {
    pub fn new(chain_run_id: ChainRunId, group: &str, jobs: Vec<StepJob>) -> Self {
        Self {
            name: format!("chain:{chain_run_id}:{group}"),
            chain_run_id,
            group: group.into(),
            jobs,
        }
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn dispatch(&self, batch: JobBatch) -> Result<(), WorkflowError>;
}

/// Keeps dispatched batches in memory until drained.
#[derive(Debug, Default)]
pub struct RecordingJobQueue {
    batches: Mutex<VecDeque<JobBatch>>,
}

impl RecordingJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<JobBatch>> {
        self.batches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take every batch dispatched so far, oldest first.
    pub fn drain(&self) -> Vec<JobBatch> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[async_trait]
impl JobQueue for RecordingJobQueue {
    async fn dispatch(&self, batch: JobBatch) -> Result<(), WorkflowError> {
        tracing::debug!(batch = %batch.name, jobs = batch.jobs.len(), "Batch queued");
        self.lock().push_back(batch);
        Ok(())
    }
}

//! In-process chain driver.
//!
//! Steps a run until it leaves `Running`, working off the engine's
//! [`RecordingJobQueue`] itself: each dispatched batch runs concurrently and
//! is followed by `complete_parallel_group`.

use super::engine::{ChainEngine, StepOutcome};
use super::queue::RecordingJobQueue;
use super::run::ChainRun;
use foreman_core::error::Result;
use foreman_core::ids::ChainRunId;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, error, warn};

const DEFAULT_MAX_STEPS: usize = 100;

pub struct ChainDriver {
    engine: Arc<ChainEngine>,
    queue: Arc<RecordingJobQueue>,
    /// Guard against goto loops.
    max_steps: usize,
}

impl ChainDriver {
    /// `queue` must be the queue `engine` dispatches to.
    pub fn new(engine: Arc<ChainEngine>, queue: Arc<RecordingJobQueue>) -> Self {
        Self {
            engine,
            queue,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Drive `id` until it is paused or terminal, or the step limit is hit.
    pub async fn run(&self, id: ChainRunId) -> Result<ChainRun> {
        for pass in 0..self.max_steps {
            let outcome = self.engine.execute_parallel_step_group(id).await?;
            debug!(run = %id, pass, ?outcome, "Chain pass");
            match outcome {
                StepOutcome::Advanced { .. } => continue,
                StepOutcome::Dispatched { .. } | StepOutcome::Waiting { .. } => {
                    self.drain_batches().await?;
                }
                StepOutcome::Idle
                | StepOutcome::Completed
                | StepOutcome::Paused { .. }
                | StepOutcome::Failed { .. } => break,
            }
        }

        let run = self.engine.get(id).await?;
        if run.is_running() {
            warn!(run = %id, max_steps = self.max_steps, index = run.current_step_index, "Step limit reached; chain left running");
        }
        Ok(run)
    }

    async fn drain_batches(&self) -> Result<()> {
        for batch in self.queue.drain() {
            let results = join_all(
                batch
                    .jobs
                    .iter()
                    .map(|job| self.engine.execute_dispatched_step(job)),
            )
            .await;
            for result in results {
                // The record already carries the failure.
                if let Err(e) = result {
                    error!(batch = %batch.name, error = %e, "Parallel step failed");
                }
            }
            self.engine
                .complete_parallel_group(batch.chain_run_id, &batch.group)
                .await?;
        }
        Ok(())
    }
}

//! Workflow and chain engines.
//!
//! A [`WorkflowRun`] is the durable record of one agent workflow: its
//! checkpoint node, a namespaced state bag, and its pause/approval state.
//! A [`ChainRun`] strings workflow steps together over a shared
//! [`ChainContext`](foreman_core::chain::ChainContext), with branching
//! rules and parallel step groups fanned out through a [`JobQueue`].
//!
//! Both kinds of run live in a [`RunStore`]: in memory, or in SQLite with
//! the default `sqlite` feature.

pub mod chain;
pub mod customization;
pub mod engine;
pub mod run;
pub mod store;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use chain::{
    BranchAction, BranchRule, ChainCatalog, ChainDefinition, ChainDriver, ChainEngine, ChainRun,
    ChainServices, ChainStatus, ChainStep, ChainStepRecord, ExecutionMode, JobBatch, JobQueue,
    RecordingJobQueue, StepContextConfig, StepJob, StepOutcome, StepStatus,
};
pub use customization::{CustomizationSource, StaticCustomizations, WorkflowCustomization};
pub use engine::WorkflowEngine;
pub use run::{COMPLETED_NODE, START_NODE, StateBag, WorkflowRun, WorkflowStatus};
pub use store::{InMemoryRunStore, RunStore, Updated};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteRunStore;

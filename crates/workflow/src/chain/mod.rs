//! Chains: ordered, branching, optionally parallel sequences of agent
//! steps over one shared context.

pub mod branch;
pub mod definition;
pub mod driver;
pub mod engine;
pub mod queue;
pub mod run;

pub use branch::{BranchAction, BranchRule, NextStep, evaluate_next_step};
pub use definition::{ChainCatalog, ChainDefinition, ChainStep, ExecutionMode, StepContextConfig};
pub use driver::ChainDriver;
pub use engine::{ChainEngine, ChainServices, StepOutcome};
pub use queue::{JobBatch, JobQueue, RecordingJobQueue, StepJob};
pub use run::{ChainRun, ChainStatus, ChainStepRecord, StepStatus};

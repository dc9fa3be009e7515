//! Agent context assembly and execution.
//!
//! Turns a domain anchor (or a running chain) into a bounded
//! [`AgentContext`] and runs an agent over it:
//!
//! 1. **Resolve** the anchor's hierarchy (task → work order → project →
//!    party → team)
//! 2. **Build** the project, client and org tiers plus stored memory
//! 3. **Truncate** to the token budget
//! 4. **Run** the backend under a budget check, deduct its cost, and log
//!    one activity record

pub mod backend;
pub mod context;
pub mod runner;

pub use backend::{AgentBackend, AgentOutput, BackendError, EchoBackend};
pub use context::{
    AgentContext, ChainScope, ContextAssembler, ContextHierarchy, OutputFilter, OutputTransform,
    Tier, truncate,
};
pub use runner::{AgentRunRequest, AgentRunner, RunOutcome};

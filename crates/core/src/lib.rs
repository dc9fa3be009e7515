//! # Foreman Core
//!
//! Domain types, traits, and error definitions for the Foreman agent
//! orchestration core. This crate has **no storage or runtime dependencies**:
//! it defines the model that every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every collaborator is a trait here; implementations live in their
//! respective crates. This enables:
//! - Swapping in-memory and SQLite backends via configuration
//! - Testing engines against in-memory stubs
//! - A clean dependency graph (all crates depend inward on core)

pub mod activity;
pub mod agent;
pub mod approval;
pub mod chain;
pub mod entity;
pub mod error;
pub mod ids;
pub mod memory;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use activity::{ActivityKind, ActivityRecord, ActivitySink, ActivityStatus};
pub use agent::{AgentConfiguration, AgentDirectory, BudgetState, InMemoryAgentDirectory};
pub use approval::{
    AiSettingsSource, ApprovalInbox, ApprovalRequest, ApprovalStatus, GlobalAiSettings,
    InMemoryApprovalInbox, NewApprovalRequest, StaticAiSettings, Urgency,
};
pub use chain::{ChainContext, Condition, ConditionEvaluator, ConditionOp, PathEvaluator};
pub use entity::{DomainDirectory, EntityKind, EntityRef, InMemoryDirectory};
pub use error::{Error, Result};
pub use ids::*;
pub use memory::{MemoryAddress, MemoryEntry, MemoryScope, MemoryStore, StoreOptions};
pub use tool::{Tool, ToolContext, ToolRegistry, ToolResult, ToolStatus};

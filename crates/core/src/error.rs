//! Error types for the Foreman domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Foreman operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Persistence of runs and records ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Budget ledger errors ---
    #[error("Budget error: {0}")]
    Budget(#[from] BudgetError),

    // --- Workflow and chain errors ---
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    // --- Context assembly errors ---
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[derive(Debug, Error)]
pub enum BudgetError {
    #[error("No budget configured for agent configuration {0}")]
    UnknownConfiguration(String),

    #[error("Ledger storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Unknown chain definition: {0}")]
    UnknownChain(String),

    #[error("Invalid chain definition '{chain}': {reason}")]
    InvalidChain { chain: String, reason: String },

    #[error("Chain {chain} has no step at index {index}")]
    UnknownStep { chain: String, index: usize },

    #[error("Invalid input for workflow kind '{kind}': {reason}")]
    InvalidInput { kind: String, reason: String },

    #[error("Unknown agent {agent} for team {team}")]
    UnknownAgent { agent: String, team: String },

    #[error("Job dispatch failed: {0}")]
    Dispatch(String),

    #[error("Approval inbox error: {0}")]
    Approval(String),
}

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("{kind} {id} could not be resolved")]
    Unresolved { kind: String, id: String },

    #[error("Entity kind '{0}' cannot anchor an agent context")]
    UnsupportedEntity(String),

    #[error("Directory lookup failed: {0}")]
    Directory(String),

    #[error("Memory lookup failed: {0}")]
    Memory(#[from] MemoryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_displays_kind_and_id() {
        let err = Error::Store(StoreError::not_found("chain run", "abc"));
        assert!(err.to_string().contains("chain run"));
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn workflow_error_displays_correctly() {
        let err = Error::Workflow(WorkflowError::InvalidInput {
            kind: "status_report".into(),
            reason: "missing 'project_id'".into(),
        });
        assert!(err.to_string().contains("status_report"));
        assert!(err.to_string().contains("project_id"));
    }

    #[test]
    fn memory_error_converts_into_context_error() {
        let err: ContextError = MemoryError::QueryFailed("boom".into()).into();
        assert!(matches!(err, ContextError::Memory(_)));
    }
}

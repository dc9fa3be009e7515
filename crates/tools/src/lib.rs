//! Tool gateway and built-in tools for Foreman.
//!
//! Every tool invocation goes through [`ToolGateway::execute`], which
//! checks permission, budget and approval requirements before the tool
//! runs and writes one activity record per attempt.

pub mod gateway;
pub mod memory_tools;

use foreman_core::memory::MemoryStore;
use foreman_core::tool::ToolRegistry;
use std::sync::Arc;

pub use gateway::ToolGateway;
pub use memory_tools::{ForgetMemoryTool, RecallTool, RememberTool};

/// Create a tool registry with the built-in memory tools.
///
/// `default_ttl_minutes` applies to `remember` calls that give no TTL.
pub fn default_registry(memory: Arc<dyn MemoryStore>, default_ttl_minutes: Option<i64>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(RememberTool::new(memory.clone(), default_ttl_minutes)));
    registry.register(Arc::new(RecallTool::new(memory.clone())));
    registry.register(Arc::new(ForgetMemoryTool::new(memory)));
    registry
}

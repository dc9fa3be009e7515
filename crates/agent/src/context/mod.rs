//! Three-tier agent context assembly.
//!
//! # Tiers (in priority order)
//!
//! | Tier | Source | Share of an over-budget context |
//! |------|--------|---------------------------------|
//! | 1. Project | Project, its work orders and tasks, project memory, prior step outputs | 3/6 |
//! | 2. Client | Owning party, its active projects, client memory | 2/6 |
//! | 3. Org | Team, org memory | 1/6 |

pub mod agent_context;
pub mod assembler;
pub mod filter;
pub mod hierarchy;
pub mod token;
pub mod truncation;

pub use agent_context::{AgentContext, Tier};
pub use assembler::{ChainScope, ContextAssembler};
pub use filter::{OutputFilter, OutputTransform};
pub use hierarchy::ContextHierarchy;
pub use truncation::truncate;

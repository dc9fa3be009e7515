//! Spend tracking and activity logging for Foreman.
//!
//! Provides the budget ledger that enforces per-agent daily and monthly
//! spend caps, and the append-only activity log every agent run, chain step
//! and tool invocation writes to.

pub mod activity;
pub mod ledger;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use activity::{ActivityLogger, TracingActivitySink};
pub use ledger::{BudgetLedger, InMemoryLedger};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteLedger;

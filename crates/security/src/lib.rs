//! Security module for Foreman: who may do what, and the record of it.
//!
//! Provides:
//! - **Permissions**: tool category → permission flag, with per-tool overrides
//! - **Approvals**: tool category → approval action type, checked against
//!   the team's AI settings, plus the auto-approval scorer
//! - **Audit logging**: structured workflow and chain transition events

pub mod approval;
pub mod audit;
pub mod permission;

pub use approval::{ApprovalPolicy, Suggestion, should_auto_approve};
pub use audit::{AuditEntry, AuditEvent, AuditLogger, AuditOutcome, AuditSink, TracingSink};
pub use permission::{PermissionDecision, PermissionPolicy};

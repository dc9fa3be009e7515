//! Strongly typed identifiers.
//!
//! Every entity the core touches is addressed by a UUID newtype so that a
//! chain run id can never be passed where a workflow run id is expected.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Uuid {
                id.0
            }
        }
    };
}

define_id!(
    /// A team (organization) that owns agents, chains and memory.
    TeamId
);
define_id!(
    /// A logical agent persona.
    AgentId
);
define_id!(
    /// The configuration entity of an agent within a team (permissions, budget).
    AgentConfigId
);
define_id!(ProjectId);
define_id!(WorkOrderId);
define_id!(TaskId);
define_id!(
    /// A party: client or other external organization.
    PartyId
);
define_id!(
    /// A chain definition (the external step list).
    ChainId
);
define_id!(ChainRunId);
define_id!(WorkflowRunId);
define_id!(StepRecordId);
define_id!(MemoryEntryId);
define_id!(ApprovalRequestId);
define_id!(
    /// A team-level customization of a workflow kind.
    CustomizationId
);

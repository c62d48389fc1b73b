//! Team run record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{NodeId, TeamDefinitionId, TeamRunId};
use crate::placement::{MemberPlacement, PlacementByMember};
use crate::status::RunStatus;

/// Authoritative state of one run of a team, owned by the host orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamRunRecord {
    /// Opaque, globally unique run identifier.
    pub team_run_id: TeamRunId,

    /// Definition the run was started from.
    pub team_definition_id: TeamDefinitionId,

    /// Positive, strictly increasing per team definition.
    pub run_version: u64,

    /// Node that owns the run registry entry.
    pub host_node_id: NodeId,

    /// Current lifecycle status.
    pub status: RunStatus,

    /// Member placements fixed at run start.
    pub placement_by_member: PlacementByMember,

    /// Coordinator member of the definition at run start.
    pub coordinator_member_name: String,

    /// When the run was registered.
    pub created_at: DateTime<Utc>,
}

impl TeamRunRecord {
    /// Placement of a member, if the member is part of the run.
    pub fn placement(&self, member_name: &str) -> Option<&MemberPlacement> {
        self.placement_by_member.get(member_name)
    }

    /// Returns true if `member_name` is the coordinator.
    pub fn is_coordinator(&self, member_name: &str) -> bool {
        self.coordinator_member_name == member_name
    }
}

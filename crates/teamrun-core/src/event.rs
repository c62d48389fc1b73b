//! Member events shipped from worker nodes back to the host.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{NodeId, TeamId, TeamRunId};

/// An event produced by a member running on a remote node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteMemberEvent {
    pub team_run_id: TeamRunId,
    pub run_version: u64,
    /// Node that produced the event.
    pub source_node_id: NodeId,
    /// Producer-assigned id. Not deduplicated by the host.
    pub source_event_id: String,
    pub event_type: String,
    pub member_name: String,
    pub agent_id: String,
    #[serde(default)]
    pub payload: Value,
}

/// A remote event after host-side sequencing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequencedTeamEvent {
    pub team_id: TeamId,
    pub team_run_id: TeamRunId,
    /// Monotonic per run and source node, starting at 1.
    pub sequence: u64,
    pub received_at: DateTime<Utc>,
    pub event: RemoteMemberEvent,
}

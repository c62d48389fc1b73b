//! Member placement resolution.
//!
//! Placement happens once, when a run starts. Each member is resolved to a
//! node by the first matching rule:
//!
//! 1. `requiredNodeId` (must be available, otherwise the run cannot start)
//! 2. `preferredNodeId` when available
//! 3. `homeNodeId` when available
//! 4. the run-wide default node when available
//! 5. the host node
//!
//! A node is available when the snapshot lists it as healthy. The host node is
//! always available to itself.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::NodeId;
use crate::status::PlacementSource;
use crate::team::TeamDefinition;

/// Node snapshot entry used at run start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementCandidateNode {
    pub node_id: NodeId,
    pub is_healthy: bool,
}

impl PlacementCandidateNode {
    pub fn new(node_id: impl Into<NodeId>, is_healthy: bool) -> Self {
        Self {
            node_id: node_id.into(),
            is_healthy,
        }
    }
}

/// Resolved node assignment of one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberPlacement {
    pub node_id: NodeId,
    pub source: PlacementSource,
}

/// Placement of every member of a run, keyed by member name.
pub type PlacementByMember = BTreeMap<String, MemberPlacement>;

/// Resolve placement for every member of `definition`.
pub fn resolve_placement(
    definition: &TeamDefinition,
    host_node_id: &NodeId,
    snapshot: &[PlacementCandidateNode],
    default_node_id: Option<&NodeId>,
) -> Result<PlacementByMember, CoreError> {
    let health: HashMap<&NodeId, bool> = snapshot
        .iter()
        .map(|node| (&node.node_id, node.is_healthy))
        .collect();
    let available =
        |node: &NodeId| node == host_node_id || health.get(node).copied().unwrap_or(false);

    let mut placement = PlacementByMember::new();
    for member in &definition.members {
        let resolved = if let Some(required) = &member.required_node_id {
            if !available(required) {
                return Err(CoreError::RequiredNodeUnavailable {
                    member: member.member_name.clone(),
                    node: required.clone(),
                });
            }
            MemberPlacement {
                node_id: required.clone(),
                source: PlacementSource::Required,
            }
        } else if let Some(node) = member.preferred_node_id.as_ref().filter(|n| available(n)) {
            MemberPlacement {
                node_id: node.clone(),
                source: PlacementSource::Preferred,
            }
        } else if let Some(node) = member.home_node_id.as_ref().filter(|n| available(n)) {
            MemberPlacement {
                node_id: node.clone(),
                source: PlacementSource::Home,
            }
        } else if let Some(node) = default_node_id.filter(|n| available(n)) {
            MemberPlacement {
                node_id: node.clone(),
                source: PlacementSource::Default,
            }
        } else {
            MemberPlacement {
                node_id: host_node_id.clone(),
                source: PlacementSource::Local,
            }
        };
        placement.insert(member.member_name.clone(), resolved);
    }

    Ok(placement)
}

/// Distinct nodes referenced by a placement, in sorted order.
pub fn placement_nodes(placement: &PlacementByMember) -> BTreeSet<NodeId> {
    placement.values().map(|p| p.node_id.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::team::TeamMember;

    fn host() -> NodeId {
        NodeId::new("node-host")
    }

    fn snapshot() -> Vec<PlacementCandidateNode> {
        vec![
            PlacementCandidateNode::new("node-host", true),
            PlacementCandidateNode::new("node-worker-1", true),
            PlacementCandidateNode::new("node-worker-2", false),
        ]
    }

    #[test]
    fn test_required_beats_every_other_hint() {
        let def = TeamDefinition::new("def", "lead").with_member(
            TeamMember::agent("lead", "a")
                .with_required_node("node-worker-1")
                .with_preferred_node("node-host")
                .with_home_node("node-host"),
        );
        let placement = resolve_placement(&def, &host(), &snapshot(), None).unwrap();
        assert_eq!(placement["lead"].node_id.as_str(), "node-worker-1");
        assert_eq!(placement["lead"].source, PlacementSource::Required);
    }

    #[test]
    fn test_unhealthy_required_node_fails() {
        let def = TeamDefinition::new("def", "lead")
            .with_member(TeamMember::agent("lead", "a").with_required_node("node-worker-2"));
        let err = resolve_placement(&def, &host(), &snapshot(), None).unwrap_err();
        assert_eq!(err.code(), "REQUIRED_NODE_UNAVAILABLE");
    }

    #[test]
    fn test_unhealthy_preferred_falls_through_to_home() {
        let def = TeamDefinition::new("def", "lead").with_member(
            TeamMember::agent("lead", "a")
                .with_preferred_node("node-worker-2")
                .with_home_node("node-worker-1"),
        );
        let placement = resolve_placement(&def, &host(), &snapshot(), None).unwrap();
        assert_eq!(placement["lead"].source, PlacementSource::Home);
    }

    #[test]
    fn test_default_then_local_fallback() {
        let def = TeamDefinition::new("def", "lead")
            .with_member(TeamMember::agent("lead", "a"))
            .with_member(TeamMember::agent("helper", "b").with_home_node("node-unknown"));

        let with_default = NodeId::new("node-worker-1");
        let placement = resolve_placement(&def, &host(), &snapshot(), Some(&with_default)).unwrap();
        assert_eq!(placement["lead"].source, PlacementSource::Default);
        assert_eq!(placement["helper"].node_id, with_default);

        let placement = resolve_placement(&def, &host(), &snapshot(), None).unwrap();
        assert_eq!(placement["helper"].source, PlacementSource::Local);
        assert_eq!(placement["helper"].node_id, host());
    }

    #[test]
    fn test_placement_nodes_are_unique() {
        let def = TeamDefinition::new("def", "a")
            .with_member(TeamMember::agent("a", "x").with_home_node("node-worker-1"))
            .with_member(TeamMember::agent("b", "x").with_home_node("node-worker-1"))
            .with_member(TeamMember::agent("c", "x"));
        let placement = resolve_placement(&def, &host(), &snapshot(), None).unwrap();
        let nodes = placement_nodes(&placement);
        assert_eq!(nodes.len(), 2);
    }
}

//! Team definition types.

use crate::error::CoreError;
use crate::ids::{NodeId, TeamDefinitionId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// What a team member refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberReferenceType {
    /// A single agent definition.
    Agent,
    /// A nested team definition.
    AgentTeam,
}

/// One participant of a team definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMember {
    /// Name unique within the definition; the routing address of the member.
    pub member_name: String,

    /// Id of the referenced agent or team definition.
    pub reference_id: String,

    /// Whether `reference_id` points at an agent or a nested team.
    pub reference_type: MemberReferenceType,

    /// Node the member normally lives on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_node_id: Option<NodeId>,

    /// Node the member must run on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_node_id: Option<NodeId>,

    /// Node the member should run on when healthy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_node_id: Option<NodeId>,
}

impl TeamMember {
    /// Create an agent member with no placement hints.
    pub fn agent(member_name: impl Into<String>, reference_id: impl Into<String>) -> Self {
        Self {
            member_name: member_name.into(),
            reference_id: reference_id.into(),
            reference_type: MemberReferenceType::Agent,
            home_node_id: None,
            required_node_id: None,
            preferred_node_id: None,
        }
    }

    /// Builder method to set the home node.
    pub fn with_home_node(mut self, node: impl Into<NodeId>) -> Self {
        self.home_node_id = Some(node.into());
        self
    }

    /// Builder method to set the required node.
    pub fn with_required_node(mut self, node: impl Into<NodeId>) -> Self {
        self.required_node_id = Some(node.into());
        self
    }

    /// Builder method to set the preferred node.
    pub fn with_preferred_node(mut self, node: impl Into<NodeId>) -> Self {
        self.preferred_node_id = Some(node.into());
        self
    }
}

/// A team template as loaded from the definition store.
///
/// Immutable once a run has been started from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamDefinition {
    /// Definition identifier.
    pub id: TeamDefinitionId,

    /// Member that receives user traffic by default.
    pub coordinator_member_name: String,

    /// Ordered list of members.
    pub members: Vec<TeamMember>,
}

impl TeamDefinition {
    /// Create a definition with no members yet.
    pub fn new(
        id: impl Into<TeamDefinitionId>,
        coordinator_member_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            coordinator_member_name: coordinator_member_name.into(),
            members: Vec::new(),
        }
    }

    /// Builder method to add a member.
    pub fn with_member(mut self, member: TeamMember) -> Self {
        self.members.push(member);
        self
    }

    /// Get a member by name.
    pub fn member(&self, member_name: &str) -> Option<&TeamMember> {
        self.members.iter().find(|m| m.member_name == member_name)
    }

    /// Member names in declaration order.
    pub fn member_names(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|m| m.member_name.as_str())
    }

    /// Check the structural invariants of the definition.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.members.is_empty() {
            return Err(CoreError::EmptyTeam(self.id.clone()));
        }

        let mut seen = HashSet::new();
        for member in &self.members {
            if !seen.insert(member.member_name.as_str()) {
                return Err(CoreError::DuplicateMember {
                    definition: self.id.clone(),
                    member: member.member_name.clone(),
                });
            }
        }

        if !seen.contains(self.coordinator_member_name.as_str()) {
            return Err(CoreError::UnknownCoordinator {
                definition: self.id.clone(),
                member: self.coordinator_member_name.clone(),
            });
        }

        Ok(())
    }
}

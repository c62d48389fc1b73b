//! Core domain errors.

use thiserror::Error;

use crate::ids::{NodeId, TeamDefinitionId};

/// Core domain errors for TeamRun.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Team definition has no members.
    #[error("Team definition '{0}' has no members")]
    EmptyTeam(TeamDefinitionId),

    /// Two members share a name.
    #[error("Duplicate member name '{member}' in team definition '{definition}'")]
    DuplicateMember {
        definition: TeamDefinitionId,
        member: String,
    },

    /// Coordinator is not one of the members.
    #[error("Coordinator '{member}' is not a member of team definition '{definition}'")]
    UnknownCoordinator {
        definition: TeamDefinitionId,
        member: String,
    },

    /// A member's required node is missing or unhealthy.
    #[error("Required node '{node}' for member '{member}' is unavailable")]
    RequiredNodeUnavailable { member: String, node: NodeId },

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyTeam(_) | Self::DuplicateMember { .. } | Self::UnknownCoordinator { .. } => {
                "INVALID_TEAM_DEFINITION"
            }
            Self::RequiredNodeUnavailable { .. } => "REQUIRED_NODE_UNAVAILABLE",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

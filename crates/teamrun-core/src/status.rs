//! Status enums for team runs and member placements.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a team run on the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run is registered and routing commands normally.
    #[default]
    Active,
    /// Run saw repeated dispatch failures but still routes commands.
    Degraded,
    /// Run was stopped. Stopped runs are removed from the registry.
    Stopped,
}

impl RunStatus {
    /// Returns true if the run is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Returns true if the run still accepts commands.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Degraded => "degraded",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which placement rule selected a member's node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementSource {
    /// The member's `requiredNodeId`.
    Required,
    /// The member's `preferredNodeId`.
    Preferred,
    /// The member's `homeNodeId`.
    Home,
    /// The run-wide default node.
    Default,
    /// Fallback to the host node.
    Local,
}

//! Error types for the host node.

use teamrun_bridge::BridgeError;
use teamrun_core::{CoreError, TeamDefinitionId, TeamId, TeamRunId};
use thiserror::Error;

/// Error type returned by collaborator seams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failures delivering a command to a remote node.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// Member bindings for a bootstrap could not be produced.
    #[error("bootstrap bindings unavailable: {0}")]
    Bindings(String),
}

/// Errors from starting a run.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("dependency hydration failed for '{definition}': {reason}")]
    Hydration {
        definition: TeamDefinitionId,
        reason: String,
    },
}

impl OrchestratorError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Core(e) => e.code(),
            Self::Hydration { .. } => "DEPENDENCY_HYDRATION_FAILED",
        }
    }
}

/// Errors from resolving a team to a run.
#[derive(Debug, Error)]
pub enum LocatorError {
    #[error("team '{0}' does not exist")]
    TeamNotFound(TeamId),

    #[error("team definition for '{team_id}' is unavailable: {reason}")]
    TeamDefinitionUnavailable { team_id: TeamId, reason: String },

    #[error("team definition '{0}' not found")]
    TeamDefinitionNotFound(TeamDefinitionId),

    #[error("team '{team_id}' members {runtime:?} do not match definition members {definition:?}")]
    TeamDefinitionMemberMismatch {
        team_id: TeamId,
        runtime: Vec<String>,
        definition: Vec<String>,
    },

    #[error("no candidate nodes available for placement")]
    NodeSnapshotEmpty,

    #[error("run '{team_run_id}' has invalid version {run_version} (last seen {last_seen})")]
    InvalidRunVersion {
        team_run_id: TeamRunId,
        run_version: u64,
        last_seen: u64,
    },

    #[error(transparent)]
    Start(#[from] OrchestratorError),
}

impl LocatorError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::TeamNotFound(_) => "TEAM_NOT_FOUND",
            Self::TeamDefinitionUnavailable { .. } => "TEAM_DEFINITION_UNAVAILABLE",
            Self::TeamDefinitionNotFound(_) => "TEAM_DEFINITION_NOT_FOUND",
            Self::TeamDefinitionMemberMismatch { .. } => "TEAM_DEFINITION_MEMBER_MISMATCH",
            Self::NodeSnapshotEmpty => "NODE_SNAPSHOT_EMPTY",
            Self::InvalidRunVersion { .. } => "INVALID_RUN_VERSION",
            Self::Start(e) => e.code(),
        }
    }
}

/// Errors loading the team catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read team catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse team catalog: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("team '{team_id}' has an invalid definition: {source}")]
    InvalidDefinition { team_id: TeamId, source: CoreError },

    #[error("team '{0}' is listed twice")]
    DuplicateTeam(TeamId),
}

//! Error types for the worker node.

use teamrun_bridge::CommandRejection;
use teamrun_core::TeamRunId;
use thiserror::Error;

/// Lookup failures in the binding registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    #[error("run '{0}' is not bound on this node")]
    RunNotBound(TeamRunId),

    #[error("run '{team_run_id}' is bound at version {bound}, envelope carries {received}")]
    RunVersionMismatch {
        team_run_id: TeamRunId,
        bound: u64,
        received: u64,
    },

    #[error("member '{member_name}' is not bound for run '{team_run_id}'")]
    MemberNotBound {
        team_run_id: TeamRunId,
        member_name: String,
    },

    /// A bootstrap older than the bound generation.
    #[error("run '{team_run_id}' is bound at version {bound}, bootstrap carries {received}")]
    StaleBootstrap {
        team_run_id: TeamRunId,
        bound: u64,
        received: u64,
    },
}

impl BindingError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::RunNotBound(_) => "RUN_NOT_BOUND",
            Self::RunVersionMismatch { .. } => "RUN_VERSION_MISMATCH",
            Self::MemberNotBound { .. } => "MEMBER_NOT_BOUND",
            Self::StaleBootstrap { .. } => "STALE_RUN_VERSION",
        }
    }
}

/// Failure reported by the local member runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct RuntimeError {
    pub code: String,
    pub message: String,
}

impl RuntimeError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Errors from executing a command envelope on this node.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Binding(#[from] BindingError),

    #[error("local runtime failed: {0}")]
    Runtime(#[from] RuntimeError),
}

impl GatewayError {
    pub fn code(&self) -> &str {
        match self {
            Self::Binding(e) => e.code(),
            Self::Runtime(e) => &e.code,
        }
    }
}

impl From<GatewayError> for CommandRejection {
    fn from(error: GatewayError) -> Self {
        CommandRejection::new(error.code(), error.to_string())
    }
}

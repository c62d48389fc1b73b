//! TeamRun Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Network/HTTP
//! - Async runtimes
//! - Persistence
//!
//! All types here describe how a team run is placed, versioned, addressed and
//! degraded. Transport and daemons live in the other workspace crates.

pub mod binding;
pub mod command;
pub mod degradation;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod event;
pub mod ids;
pub mod placement;
pub mod run;
pub mod status;
pub mod team;

// Re-export commonly used types
pub use binding::{LlmConfig, MemberBinding};
pub use command::{
    InterAgentMessageCommand, ToolApprovalCommand, UserMessage, UserMessageCommand,
};
pub use degradation::{
    DegradationAction, DegradationThresholds, RunDegradationPolicy, RunDegradationState,
};
pub use dispatch::{DispatchError, DispatchErrorCode, DispatchResult};
pub use envelope::{
    ControlStopPayload, Envelope, EnvelopeBody, EnvelopeBuilder, EnvelopeKind,
    InterAgentMessagePayload, RunBootstrapPayload, ToolApprovalPayload, UserMessagePayload,
};
pub use error::CoreError;
pub use event::{RemoteMemberEvent, SequencedTeamEvent};
pub use ids::{EnvelopeId, NodeId, TeamDefinitionId, TeamId, TeamRunId};
pub use placement::{
    placement_nodes, resolve_placement, MemberPlacement, PlacementByMember, PlacementCandidateNode,
};
pub use run::TeamRunRecord;
pub use status::{PlacementSource, RunStatus};
pub use team::{MemberReferenceType, TeamDefinition, TeamMember};

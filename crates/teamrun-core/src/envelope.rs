//! Command envelopes exchanged between host and worker nodes.
//!
//! On the wire an envelope is a flat JSON object:
//!
//! ```json
//! {
//!   "envelopeId": "…",
//!   "teamRunId": "run-…",
//!   "runVersion": 3,
//!   "kind": "INTER_AGENT_MESSAGE_REQUEST",
//!   "payload": { "senderAgentId": "…", "recipientName": "helper", … }
//! }
//! ```
//!
//! In Rust the `kind`/`payload` pair is the [`EnvelopeBody`] sum type, so a
//! payload can never disagree with its kind.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::binding::MemberBinding;
use crate::command::{
    InterAgentMessageCommand, ToolApprovalCommand, UserMessage, UserMessageCommand,
};
use crate::error::CoreError;
use crate::ids::{EnvelopeId, NodeId, TeamDefinitionId, TeamRunId};

/// Discriminant of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvelopeKind {
    UserMessage,
    InterAgentMessageRequest,
    ToolApproval,
    ControlStop,
    RunBootstrap,
}

impl EnvelopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserMessage => "USER_MESSAGE",
            Self::InterAgentMessageRequest => "INTER_AGENT_MESSAGE_REQUEST",
            Self::ToolApproval => "TOOL_APPROVAL",
            Self::ControlStop => "CONTROL_STOP",
            Self::RunBootstrap => "RUN_BOOTSTRAP",
        }
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `USER_MESSAGE` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMessagePayload {
    pub target_member_name: String,
    pub user_message: UserMessage,
}

/// `INTER_AGENT_MESSAGE_REQUEST` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterAgentMessagePayload {
    pub sender_agent_id: String,
    pub recipient_name: String,
    pub content: String,
    pub message_type: String,
}

/// `TOOL_APPROVAL` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolApprovalPayload {
    pub agent_name: String,
    pub tool_invocation_id: String,
    pub is_approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// `CONTROL_STOP` payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlStopPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// `RUN_BOOTSTRAP` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunBootstrapPayload {
    pub team_definition_id: TeamDefinitionId,
    pub host_node_id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_team_id: Option<String>,
    pub member_bindings: Vec<MemberBinding>,
}

impl From<&UserMessageCommand> for UserMessagePayload {
    fn from(cmd: &UserMessageCommand) -> Self {
        Self {
            target_member_name: cmd.target_member_name.clone(),
            user_message: cmd.user_message.clone(),
        }
    }
}

impl From<&InterAgentMessageCommand> for InterAgentMessagePayload {
    fn from(cmd: &InterAgentMessageCommand) -> Self {
        Self {
            sender_agent_id: cmd.sender_agent_id.clone(),
            recipient_name: cmd.recipient_name.clone(),
            content: cmd.content.clone(),
            message_type: cmd.message_type.clone(),
        }
    }
}

impl From<&ToolApprovalCommand> for ToolApprovalPayload {
    fn from(cmd: &ToolApprovalCommand) -> Self {
        Self {
            agent_name: cmd.agent_name.clone(),
            tool_invocation_id: cmd.tool_invocation_id.clone(),
            is_approved: cmd.is_approved,
            reason: cmd.reason.clone(),
        }
    }
}

/// Typed payload of an envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum EnvelopeBody {
    UserMessage(UserMessagePayload),
    InterAgentMessageRequest(InterAgentMessagePayload),
    ToolApproval(ToolApprovalPayload),
    ControlStop(ControlStopPayload),
    RunBootstrap(RunBootstrapPayload),
}

impl EnvelopeBody {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Self::UserMessage(_) => EnvelopeKind::UserMessage,
            Self::InterAgentMessageRequest(_) => EnvelopeKind::InterAgentMessageRequest,
            Self::ToolApproval(_) => EnvelopeKind::ToolApproval,
            Self::ControlStop(_) => EnvelopeKind::ControlStop,
            Self::RunBootstrap(_) => EnvelopeKind::RunBootstrap,
        }
    }

    fn to_payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::UserMessage(p) => serde_json::to_value(p),
            Self::InterAgentMessageRequest(p) => serde_json::to_value(p),
            Self::ToolApproval(p) => serde_json::to_value(p),
            Self::ControlStop(p) => serde_json::to_value(p),
            Self::RunBootstrap(p) => serde_json::to_value(p),
        }
    }

    fn from_payload(kind: EnvelopeKind, payload: Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            EnvelopeKind::UserMessage => Self::UserMessage(serde_json::from_value(payload)?),
            EnvelopeKind::InterAgentMessageRequest => {
                Self::InterAgentMessageRequest(serde_json::from_value(payload)?)
            }
            EnvelopeKind::ToolApproval => Self::ToolApproval(serde_json::from_value(payload)?),
            EnvelopeKind::ControlStop => {
                let payload = if payload.is_null() {
                    Value::Object(Default::default())
                } else {
                    payload
                };
                Self::ControlStop(serde_json::from_value(payload)?)
            }
            EnvelopeKind::RunBootstrap => Self::RunBootstrap(serde_json::from_value(payload)?),
        })
    }
}

/// A command addressed to one run generation.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub envelope_id: EnvelopeId,
    pub team_run_id: TeamRunId,
    /// Pins the envelope to one run generation.
    pub run_version: u64,
    pub body: EnvelopeBody,
}

impl Envelope {
    pub fn kind(&self) -> EnvelopeKind {
        self.body.kind()
    }

    /// Serialize into the JSON wire shape.
    pub fn to_json(&self) -> Result<Value, CoreError> {
        Ok(serde_json::to_value(EnvelopeWire {
            envelope_id: Some(self.envelope_id.clone()),
            team_run_id: self.team_run_id.clone(),
            run_version: self.run_version,
            kind: self.kind(),
            payload: self.body.to_payload()?,
        })?)
    }

    /// Parse the JSON wire shape. A missing `envelopeId` is generated.
    pub fn from_json(value: Value) -> Result<Self, CoreError> {
        let wire: EnvelopeWire = serde_json::from_value(value)?;
        if wire.run_version == 0 {
            return Err(CoreError::InvalidInput("runVersion must be positive".to_string()));
        }
        let body = EnvelopeBody::from_payload(wire.kind, wire.payload)?;
        Ok(EnvelopeBuilder::new(wire.team_run_id, wire.run_version)
            .with_envelope_id(wire.envelope_id)
            .build(body))
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    envelope_id: Option<EnvelopeId>,
    team_run_id: TeamRunId,
    run_version: u64,
    kind: EnvelopeKind,
    #[serde(default)]
    payload: Value,
}

/// Builds envelopes for one run generation.
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    team_run_id: TeamRunId,
    run_version: u64,
    envelope_id: Option<EnvelopeId>,
}

impl EnvelopeBuilder {
    pub fn new(team_run_id: TeamRunId, run_version: u64) -> Self {
        Self {
            team_run_id,
            run_version,
            envelope_id: None,
        }
    }

    /// Use a caller-provided id instead of generating one.
    pub fn with_envelope_id(mut self, envelope_id: Option<EnvelopeId>) -> Self {
        self.envelope_id = envelope_id;
        self
    }

    pub fn build(self, body: EnvelopeBody) -> Envelope {
        Envelope {
            envelope_id: self.envelope_id.unwrap_or_else(EnvelopeId::generate),
            team_run_id: self.team_run_id,
            run_version: self.run_version,
            body,
        }
    }

    pub fn user_message(self, cmd: &UserMessageCommand) -> Envelope {
        self.build(EnvelopeBody::UserMessage(cmd.into()))
    }

    pub fn inter_agent_message(self, cmd: &InterAgentMessageCommand) -> Envelope {
        self.build(EnvelopeBody::InterAgentMessageRequest(cmd.into()))
    }

    pub fn tool_approval(self, cmd: &ToolApprovalCommand) -> Envelope {
        self.build(EnvelopeBody::ToolApproval(cmd.into()))
    }

    pub fn control_stop(self, reason: Option<String>) -> Envelope {
        self.build(EnvelopeBody::ControlStop(ControlStopPayload { reason }))
    }

    pub fn run_bootstrap(self, payload: RunBootstrapPayload) -> Envelope {
        self.build(EnvelopeBody::RunBootstrap(payload))
    }
}

//! Commands the host routes to team members.
//!
//! These are the inputs of the routing port. Envelope payloads are built from
//! them, carrying only the fields that matter on the receiving node.

use serde::{Deserialize, Serialize};

use crate::ids::TeamDefinitionId;

/// A user message with optional attached context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMessage {
    pub content: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_file_paths: Vec<String>,
}

impl UserMessage {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            context_file_paths: Vec::new(),
        }
    }
}

/// Deliver a user message to one member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMessageCommand {
    pub target_member_name: String,
    pub user_message: UserMessage,
}

/// One member asking another member to act on a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterAgentMessageCommand {
    pub sender_agent_id: String,
    pub recipient_name: String,
    pub content: String,
    pub message_type: String,

    /// Host-local context. Never forwarded to other nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_definition_id: Option<TeamDefinitionId>,
}

/// A human decision on a pending tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolApprovalCommand {
    pub agent_name: String,
    pub tool_invocation_id: String,
    pub is_approved: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

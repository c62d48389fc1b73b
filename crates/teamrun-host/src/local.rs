//! Members executed on the host itself.

use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use serde_json::{json, Value};
use teamrun_core::{
    InterAgentMessageCommand, NodeId, TeamRunId, ToolApprovalCommand, UserMessageCommand,
};
use tracing::{debug, info, warn};

use crate::error::BoxError;
use crate::events::RemoteEventRebroadcastService;
use crate::routing::LocalCommandDispatcher;

/// Answers every command for a host-local member with one event on the
/// team's stream, like the worker's echo runtime.
///
/// Events are published from a spawned task once [`attach`](Self::attach)
/// has been called; before that commands are only logged.
pub struct EchoLocalDispatcher {
    node_id: NodeId,
    events: OnceLock<Weak<RemoteEventRebroadcastService>>,
}

impl EchoLocalDispatcher {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            events: OnceLock::new(),
        }
    }

    /// Publish produced events through `events`. Later calls are ignored.
    pub fn attach(&self, events: &Arc<RemoteEventRebroadcastService>) {
        if self.events.set(Arc::downgrade(events)).is_err() {
            debug!("Echo dispatcher already attached");
        }
    }

    fn emit(
        &self,
        team_run_id: &TeamRunId,
        member_name: &str,
        event_type: &'static str,
        payload: Value,
    ) {
        let Some(events) = self.events.get().and_then(Weak::upgrade) else {
            debug!(
                team_run_id = %team_run_id,
                member = member_name,
                event_type,
                "No event stream attached"
            );
            return;
        };
        let node_id = self.node_id.clone();
        let team_run_id = team_run_id.clone();
        let member_name = member_name.to_string();
        tokio::spawn(async move {
            if let Err(rejection) = events
                .publish_local(&node_id, &team_run_id, &member_name, event_type, payload)
                .await
            {
                warn!(
                    team_run_id = %team_run_id,
                    member = %member_name,
                    code = %rejection.code,
                    "Failed to publish local member event"
                );
            }
        });
    }
}

#[async_trait]
impl LocalCommandDispatcher for EchoLocalDispatcher {
    async fn dispatch_user_message(
        &self,
        team_run_id: &TeamRunId,
        command: &UserMessageCommand,
    ) -> Result<(), BoxError> {
        self.emit(
            team_run_id,
            &command.target_member_name,
            "ASSISTANT_MESSAGE",
            json!({ "content": format!("echo: {}", command.user_message.content) }),
        );
        Ok(())
    }

    async fn dispatch_inter_agent_message(
        &self,
        team_run_id: &TeamRunId,
        command: &InterAgentMessageCommand,
    ) -> Result<(), BoxError> {
        self.emit(
            team_run_id,
            &command.recipient_name,
            "INTER_AGENT_MESSAGE_RECEIVED",
            json!({
                "senderAgentId": command.sender_agent_id,
                "messageType": command.message_type,
                "content": command.content,
            }),
        );
        Ok(())
    }

    async fn dispatch_tool_approval(
        &self,
        team_run_id: &TeamRunId,
        command: &ToolApprovalCommand,
    ) -> Result<(), BoxError> {
        self.emit(
            team_run_id,
            &command.agent_name,
            "TOOL_APPROVAL_APPLIED",
            json!({
                "toolInvocationId": command.tool_invocation_id,
                "isApproved": command.is_approved,
            }),
        );
        Ok(())
    }

    async fn stop_run(&self, team_run_id: &TeamRunId) -> Result<(), BoxError> {
        info!(team_run_id = %team_run_id, "Local members stopped");
        Ok(())
    }
}

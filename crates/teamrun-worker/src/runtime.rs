//! Local member execution seam.
//!
//! Agent execution itself is outside this workspace. The gateway hands
//! verified, bound commands to a [`LocalMemberRuntime`]; the daemon ships
//! [`EchoMemberRuntime`], which acknowledges every message with a member
//! event so a deployment can be exercised end to end.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::json;
use teamrun_bridge::EventUplinkClient;
use teamrun_core::{
    InterAgentMessagePayload, MemberBinding, NodeId, RemoteMemberEvent, TeamRunId,
    ToolApprovalPayload, UserMessagePayload,
};
use tracing::{info, warn};

use crate::binding_registry::BoundRun;
use crate::error::RuntimeError;

/// Addressing of one member within a bound run generation.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberContext {
    pub team_run_id: TeamRunId,
    pub run_version: u64,
    pub binding: MemberBinding,
}

/// Executes commands for members bound on this node.
#[async_trait]
pub trait LocalMemberRuntime: Send + Sync {
    /// Called once per bootstrap, after the bindings are registered.
    async fn prepare_run(&self, run: &BoundRun) -> Result<(), RuntimeError>;

    async fn deliver_user_message(
        &self,
        member: MemberContext,
        payload: UserMessagePayload,
    ) -> Result<(), RuntimeError>;

    async fn deliver_inter_agent_message(
        &self,
        member: MemberContext,
        payload: InterAgentMessagePayload,
    ) -> Result<(), RuntimeError>;

    async fn deliver_tool_approval(
        &self,
        member: MemberContext,
        payload: ToolApprovalPayload,
    ) -> Result<(), RuntimeError>;

    /// Stop all local members of the run. Must tolerate unknown runs.
    async fn stop_run(
        &self,
        team_run_id: &TeamRunId,
        reason: Option<&str>,
    ) -> Result<(), RuntimeError>;
}

/// Destination for events produced by local members.
#[async_trait]
pub trait MemberEventPublisher: Send + Sync {
    async fn publish(&self, event: RemoteMemberEvent) -> Result<u64, String>;
}

#[async_trait]
impl MemberEventPublisher for EventUplinkClient {
    async fn publish(&self, event: RemoteMemberEvent) -> Result<u64, String> {
        EventUplinkClient::publish(self, &event)
            .await
            .map_err(|e| e.to_string())
    }
}

/// Runtime that answers every delivered command with one member event.
///
/// Events are published from a spawned task so the command response never
/// waits on the uplink.
pub struct EchoMemberRuntime {
    node_id: NodeId,
    publisher: Arc<dyn MemberEventPublisher>,
    prepared: Mutex<HashSet<TeamRunId>>,
}

impl EchoMemberRuntime {
    pub fn new(node_id: NodeId, publisher: Arc<dyn MemberEventPublisher>) -> Self {
        Self {
            node_id,
            publisher,
            prepared: Mutex::new(HashSet::new()),
        }
    }

    /// Runs prepared and not yet stopped.
    pub fn prepared_runs(&self) -> usize {
        self.prepared.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn emit(&self, member: &MemberContext, event_type: &str, payload: serde_json::Value) {
        let event = RemoteMemberEvent {
            team_run_id: member.team_run_id.clone(),
            run_version: member.run_version,
            source_node_id: self.node_id.clone(),
            source_event_id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.to_string(),
            member_name: member.binding.member_name.clone(),
            agent_id: member.binding.member_agent_id.clone(),
            payload,
        };
        let publisher = self.publisher.clone();
        tokio::spawn(async move {
            let team_run_id = event.team_run_id.clone();
            if let Err(e) = publisher.publish(event).await {
                warn!(team_run_id = %team_run_id, error = %e, "Failed to publish member event");
            }
        });
    }
}

#[async_trait]
impl LocalMemberRuntime for EchoMemberRuntime {
    async fn prepare_run(&self, run: &BoundRun) -> Result<(), RuntimeError> {
        self.prepared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(run.team_run_id.clone());
        info!(
            team_run_id = %run.team_run_id,
            run_version = run.run_version,
            members = ?run.bindings.keys().collect::<Vec<_>>(),
            "Local members prepared"
        );
        Ok(())
    }

    async fn deliver_user_message(
        &self,
        member: MemberContext,
        payload: UserMessagePayload,
    ) -> Result<(), RuntimeError> {
        self.emit(
            &member,
            "ASSISTANT_MESSAGE",
            json!({ "content": format!("echo: {}", payload.user_message.content) }),
        );
        Ok(())
    }

    async fn deliver_inter_agent_message(
        &self,
        member: MemberContext,
        payload: InterAgentMessagePayload,
    ) -> Result<(), RuntimeError> {
        self.emit(
            &member,
            "INTER_AGENT_MESSAGE_RECEIVED",
            json!({
                "senderAgentId": payload.sender_agent_id,
                "messageType": payload.message_type,
                "content": payload.content,
            }),
        );
        Ok(())
    }

    async fn deliver_tool_approval(
        &self,
        member: MemberContext,
        payload: ToolApprovalPayload,
    ) -> Result<(), RuntimeError> {
        self.emit(
            &member,
            "TOOL_APPROVAL_APPLIED",
            json!({
                "toolInvocationId": payload.tool_invocation_id,
                "isApproved": payload.is_approved,
            }),
        );
        Ok(())
    }

    async fn stop_run(
        &self,
        team_run_id: &TeamRunId,
        reason: Option<&str>,
    ) -> Result<(), RuntimeError> {
        let removed = self
            .prepared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(team_run_id);
        info!(
            team_run_id = %team_run_id,
            reason = reason.unwrap_or("-"),
            removed,
            "Local members stopped"
        );
        Ok(())
    }
}

//! Worker-side execution of command envelopes.

use std::sync::Arc;

use async_trait::async_trait;
use teamrun_bridge::{CommandHandler, CommandRejection};
use teamrun_core::{Envelope, EnvelopeBody, NodeId};
use tracing::{debug, info, warn};

use crate::binding_registry::{BoundRun, RunScopedTeamBindingRegistry};
use crate::error::GatewayError;
use crate::runtime::{LocalMemberRuntime, MemberContext};

/// Routes verified envelopes to the local runtime.
pub struct RemoteMemberExecutionGateway {
    registry: Arc<RunScopedTeamBindingRegistry>,
    runtime: Arc<dyn LocalMemberRuntime>,
}

impl RemoteMemberExecutionGateway {
    pub fn new(
        registry: Arc<RunScopedTeamBindingRegistry>,
        runtime: Arc<dyn LocalMemberRuntime>,
    ) -> Self {
        Self { registry, runtime }
    }

    pub fn registry(&self) -> &Arc<RunScopedTeamBindingRegistry> {
        &self.registry
    }

    /// Execute one envelope.
    pub async fn dispatch(&self, envelope: Envelope) -> Result<(), GatewayError> {
        let Envelope {
            team_run_id,
            run_version,
            body,
            ..
        } = envelope;

        match body {
            EnvelopeBody::RunBootstrap(payload) => {
                let run = BoundRun::from_bootstrap(team_run_id, run_version, payload);
                self.registry.register(run.clone())?;
                self.runtime.prepare_run(&run).await?;
                Ok(())
            }
            EnvelopeBody::UserMessage(payload) => {
                let binding = self.registry.resolve_member(
                    &team_run_id,
                    run_version,
                    &payload.target_member_name,
                )?;
                let member = MemberContext {
                    team_run_id,
                    run_version,
                    binding,
                };
                Ok(self.runtime.deliver_user_message(member, payload).await?)
            }
            EnvelopeBody::InterAgentMessageRequest(payload) => {
                let binding =
                    self.registry
                        .resolve_member(&team_run_id, run_version, &payload.recipient_name)?;
                let member = MemberContext {
                    team_run_id,
                    run_version,
                    binding,
                };
                Ok(self.runtime.deliver_inter_agent_message(member, payload).await?)
            }
            EnvelopeBody::ToolApproval(payload) => {
                let binding =
                    self.registry
                        .resolve_member(&team_run_id, run_version, &payload.agent_name)?;
                let member = MemberContext {
                    team_run_id,
                    run_version,
                    binding,
                };
                Ok(self.runtime.deliver_tool_approval(member, payload).await?)
            }
            EnvelopeBody::ControlStop(payload) => {
                match self.registry.unregister(&team_run_id, run_version) {
                    Some(run) => info!(
                        team_run_id = %team_run_id,
                        run_version = run.run_version,
                        "Run bindings removed"
                    ),
                    None => debug!(team_run_id = %team_run_id, run_version, "Stop for unbound run"),
                }
                Ok(self
                    .runtime
                    .stop_run(&team_run_id, payload.reason.as_deref())
                    .await?)
            }
        }
    }
}

#[async_trait]
impl CommandHandler for RemoteMemberExecutionGateway {
    async fn handle_command(
        &self,
        source_node_id: NodeId,
        envelope: Envelope,
    ) -> Result<(), CommandRejection> {
        let kind = envelope.kind();
        let team_run_id = envelope.team_run_id.clone();
        self.dispatch(envelope).await.map_err(|e| {
            warn!(
                source_node = %source_node_id,
                team_run_id = %team_run_id,
                kind = %kind,
                code = e.code(),
                error = %e,
                "Envelope refused"
            );
            CommandRejection::from(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding_registry::tests::bootstrap;
    use crate::error::RuntimeError;
    use std::sync::Mutex;
    use teamrun_core::{
        EnvelopeBuilder, InterAgentMessageCommand, InterAgentMessagePayload, TeamRunId,
        ToolApprovalCommand, ToolApprovalPayload, UserMessage, UserMessageCommand,
        UserMessagePayload,
    };

    /// Records every runtime call as a short string.
    #[derive(Default)]
    struct RecordingRuntime {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingRuntime {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LocalMemberRuntime for RecordingRuntime {
        async fn prepare_run(&self, run: &BoundRun) -> Result<(), RuntimeError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("prepare {}@{}", run.team_run_id, run.run_version));
            Ok(())
        }

        async fn deliver_user_message(
            &self,
            member: MemberContext,
            payload: UserMessagePayload,
        ) -> Result<(), RuntimeError> {
            self.calls.lock().unwrap().push(format!(
                "user {} {}",
                member.binding.member_name, payload.user_message.content
            ));
            Ok(())
        }

        async fn deliver_inter_agent_message(
            &self,
            member: MemberContext,
            payload: InterAgentMessagePayload,
        ) -> Result<(), RuntimeError> {
            self.calls.lock().unwrap().push(format!(
                "inter {} from {}",
                member.binding.member_name, payload.sender_agent_id
            ));
            Ok(())
        }

        async fn deliver_tool_approval(
            &self,
            member: MemberContext,
            payload: ToolApprovalPayload,
        ) -> Result<(), RuntimeError> {
            self.calls.lock().unwrap().push(format!(
                "approval {} {}",
                member.binding.member_name, payload.is_approved
            ));
            Ok(())
        }

        async fn stop_run(
            &self,
            team_run_id: &TeamRunId,
            _reason: Option<&str>,
        ) -> Result<(), RuntimeError> {
            self.calls.lock().unwrap().push(format!("stop {}", team_run_id));
            Ok(())
        }
    }

    fn gateway() -> (RemoteMemberExecutionGateway, Arc<RecordingRuntime>) {
        let runtime = Arc::new(RecordingRuntime::default());
        let gateway = RemoteMemberExecutionGateway::new(
            Arc::new(RunScopedTeamBindingRegistry::new()),
            runtime.clone(),
        );
        (gateway, runtime)
    }

    fn envelope(version: u64) -> EnvelopeBuilder {
        EnvelopeBuilder::new(TeamRunId::new("run-1"), version)
    }

    fn user_message(member: &str, text: &str) -> UserMessageCommand {
        UserMessageCommand {
            target_member_name: member.to_string(),
            user_message: UserMessage::new(text),
        }
    }

    #[tokio::test]
    async fn test_bootstrap_then_message_kinds() {
        let (gateway, runtime) = gateway();
        gateway
            .dispatch(envelope(1).run_bootstrap(bootstrap(&["writer", "critic"])))
            .await
            .unwrap();

        gateway
            .dispatch(envelope(1).user_message(&user_message("writer", "hello")))
            .await
            .unwrap();
        gateway
            .dispatch(envelope(1).inter_agent_message(&InterAgentMessageCommand {
                sender_agent_id: "agent-writer".to_string(),
                recipient_name: "critic".to_string(),
                content: "review".to_string(),
                message_type: "TASK".to_string(),
                team_definition_id: None,
            }))
            .await
            .unwrap();
        gateway
            .dispatch(envelope(1).tool_approval(&ToolApprovalCommand {
                agent_name: "critic".to_string(),
                tool_invocation_id: "tool-1".to_string(),
                is_approved: true,
                reason: None,
            }))
            .await
            .unwrap();

        assert_eq!(
            runtime.calls(),
            vec![
                "prepare run-1@1",
                "user writer hello",
                "inter critic from agent-writer",
                "approval critic true",
            ]
        );
    }

    #[tokio::test]
    async fn test_message_requires_binding() {
        let (gateway, runtime) = gateway();
        let err = gateway
            .dispatch(envelope(1).user_message(&user_message("writer", "hello")))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "RUN_NOT_BOUND");
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_inter_agent_message_to_unbound_run() {
        let (gateway, runtime) = gateway();
        let err = gateway
            .dispatch(envelope(3).inter_agent_message(&InterAgentMessageCommand {
                sender_agent_id: "agent-lead".to_string(),
                recipient_name: "critic".to_string(),
                content: "review".to_string(),
                message_type: "TASK".to_string(),
                team_definition_id: None,
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "RUN_NOT_BOUND");
        assert!(runtime.calls().is_empty());
        assert!(gateway.registry().is_empty());
    }

    #[tokio::test]
    async fn test_stale_version_is_rejected() {
        let (gateway, _) = gateway();
        gateway
            .dispatch(envelope(2).run_bootstrap(bootstrap(&["writer"])))
            .await
            .unwrap();

        let err = gateway
            .dispatch(envelope(1).user_message(&user_message("writer", "late")))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "RUN_VERSION_MISMATCH");

        let err = gateway
            .dispatch(envelope(2).user_message(&user_message("ghost", "hi")))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "MEMBER_NOT_BOUND");
    }

    #[tokio::test]
    async fn test_control_stop_unbinds_and_is_idempotent() {
        let (gateway, runtime) = gateway();
        gateway
            .dispatch(envelope(1).run_bootstrap(bootstrap(&["writer"])))
            .await
            .unwrap();

        gateway.dispatch(envelope(1).control_stop(None)).await.unwrap();
        assert!(gateway.registry().is_empty());
        gateway.dispatch(envelope(1).control_stop(None)).await.unwrap();

        let err = gateway
            .dispatch(envelope(1).user_message(&user_message("writer", "after stop")))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "RUN_NOT_BOUND");
        assert_eq!(
            runtime.calls(),
            vec!["prepare run-1@1", "stop run-1", "stop run-1"]
        );
    }

    #[tokio::test]
    async fn test_rejection_carries_code() {
        let (gateway, _) = gateway();
        let rejection = gateway
            .handle_command(
                NodeId::new("node-host"),
                envelope(1).user_message(&user_message("writer", "hello")),
            )
            .await
            .unwrap_err();
        assert_eq!(rejection.code, "RUN_NOT_BOUND");
    }
}

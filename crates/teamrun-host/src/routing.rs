//! Per-run routing of commands to the node that owns each member.
//!
//! A [`TeamRoutingPortAdapter`] is created once per run and holds the run's
//! fixed placement. Local members are served by a [`LocalCommandDispatcher`];
//! remote members by a [`RemoteRunBridge`], which is asked to bootstrap each
//! remote node once before the first command reaches it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures_util::future::{join_all, BoxFuture, FutureExt, Shared};
use teamrun_core::{
    placement_nodes, DispatchError, DispatchErrorCode, DispatchResult, Envelope, EnvelopeBuilder,
    InterAgentMessageCommand, NodeId, PlacementByMember, TeamRunId, ToolApprovalCommand,
    UserMessageCommand,
};
use tracing::{debug, info, warn};

use crate::error::{BoxError, RoutingError};

/// Routes the commands of one run.
#[async_trait]
pub trait TeamRoutingPort: Send + Sync {
    async fn dispatch_user_message(&self, command: &UserMessageCommand) -> DispatchResult;

    async fn dispatch_inter_agent_message_request(
        &self,
        command: &InterAgentMessageCommand,
    ) -> DispatchResult;

    async fn dispatch_tool_approval(&self, command: &ToolApprovalCommand) -> DispatchResult;

    /// Stop the run on every node that hosts one of its members.
    async fn dispatch_control_stop(&self) -> DispatchResult;
}

/// Executes commands for members placed on this node.
#[async_trait]
pub trait LocalCommandDispatcher: Send + Sync {
    async fn dispatch_user_message(
        &self,
        team_run_id: &TeamRunId,
        command: &UserMessageCommand,
    ) -> Result<(), BoxError>;

    async fn dispatch_inter_agent_message(
        &self,
        team_run_id: &TeamRunId,
        command: &InterAgentMessageCommand,
    ) -> Result<(), BoxError>;

    async fn dispatch_tool_approval(
        &self,
        team_run_id: &TeamRunId,
        command: &ToolApprovalCommand,
    ) -> Result<(), BoxError>;

    async fn stop_run(&self, team_run_id: &TeamRunId) -> Result<(), BoxError>;
}

/// Delivery of one run's envelopes to remote nodes.
#[async_trait]
pub trait RemoteRunBridge: Send + Sync {
    /// Ship the run's member bindings to `node_id`.
    async fn bootstrap_node(&self, node_id: &NodeId) -> Result<(), RoutingError>;

    async fn send_envelope(&self, node_id: &NodeId, envelope: Envelope) -> Result<(), RoutingError>;
}

type Readiness = Shared<BoxFuture<'static, Result<(), Arc<RoutingError>>>>;

/// Routing port for one run.
pub struct TeamRoutingPortAdapter {
    team_run_id: TeamRunId,
    run_version: u64,
    local_node_id: NodeId,
    placement: PlacementByMember,
    local: Arc<dyn LocalCommandDispatcher>,
    remote: Arc<dyn RemoteRunBridge>,
    /// Bootstrap per remote node. A completed `Ok` entry means ready.
    readiness: Mutex<HashMap<NodeId, Readiness>>,
}

impl TeamRoutingPortAdapter {
    pub fn new(
        team_run_id: TeamRunId,
        run_version: u64,
        local_node_id: NodeId,
        placement: PlacementByMember,
        local: Arc<dyn LocalCommandDispatcher>,
        remote: Arc<dyn RemoteRunBridge>,
    ) -> Self {
        Self {
            team_run_id,
            run_version,
            local_node_id,
            placement,
            local,
            remote,
            readiness: Mutex::new(HashMap::new()),
        }
    }

    fn envelopes(&self) -> EnvelopeBuilder {
        EnvelopeBuilder::new(self.team_run_id.clone(), self.run_version)
    }

    fn target_node(&self, member_name: &str) -> Result<NodeId, DispatchError> {
        self.placement
            .get(member_name)
            .map(|p| p.node_id.clone())
            .ok_or_else(|| DispatchError::target_not_placed(member_name))
    }

    /// Bootstrap `node_id` unless it already is. Concurrent callers share one
    /// bootstrap; a failed bootstrap is forgotten so the next call retries.
    async fn ensure_ready(&self, node_id: &NodeId) -> Result<(), Arc<RoutingError>> {
        let readiness = {
            let mut map = self.readiness.lock().unwrap_or_else(PoisonError::into_inner);
            match map.get(node_id) {
                Some(existing) => existing.clone(),
                None => {
                    let remote = self.remote.clone();
                    let node = node_id.clone();
                    let bootstrap =
                        async move { remote.bootstrap_node(&node).await.map_err(Arc::new) }
                            .boxed()
                            .shared();
                    map.insert(node_id.clone(), bootstrap.clone());
                    bootstrap
                }
            }
        };

        let result = readiness.clone().await;
        if result.is_err() {
            let mut map = self.readiness.lock().unwrap_or_else(PoisonError::into_inner);
            if map.get(node_id).is_some_and(|current| current.ptr_eq(&readiness)) {
                map.remove(node_id);
            }
        }
        result
    }

    async fn send_remote(&self, node_id: &NodeId, envelope: Envelope) -> DispatchResult {
        self.ensure_ready(node_id).await.map_err(|e| {
            warn!(
                team_run_id = %self.team_run_id,
                node_id = %node_id,
                error = %e,
                "Node bootstrap failed"
            );
            DispatchError::dispatch_failed(e)
        })?;

        debug!(
            team_run_id = %self.team_run_id,
            node_id = %node_id,
            kind = %envelope.kind(),
            "Routing command to remote node"
        );
        self.remote
            .send_envelope(node_id, envelope)
            .await
            .map_err(|e| {
                warn!(
                    team_run_id = %self.team_run_id,
                    node_id = %node_id,
                    error = %e,
                    "Remote dispatch failed"
                );
                DispatchError::dispatch_failed(e)
            })
    }

    fn local_failed(&self, error: BoxError) -> DispatchError {
        warn!(team_run_id = %self.team_run_id, error = %error, "Local dispatch failed");
        DispatchError::dispatch_failed(error)
    }
}

#[async_trait]
impl TeamRoutingPort for TeamRoutingPortAdapter {
    async fn dispatch_user_message(&self, command: &UserMessageCommand) -> DispatchResult {
        let node_id = self.target_node(&command.target_member_name)?;
        if node_id == self.local_node_id {
            return self
                .local
                .dispatch_user_message(&self.team_run_id, command)
                .await
                .map_err(|e| self.local_failed(e));
        }
        self.send_remote(&node_id, self.envelopes().user_message(command)).await
    }

    async fn dispatch_inter_agent_message_request(
        &self,
        command: &InterAgentMessageCommand,
    ) -> DispatchResult {
        let node_id = self.target_node(&command.recipient_name)?;
        if node_id == self.local_node_id {
            return self
                .local
                .dispatch_inter_agent_message(&self.team_run_id, command)
                .await
                .map_err(|e| self.local_failed(e));
        }
        self.send_remote(&node_id, self.envelopes().inter_agent_message(command))
            .await
    }

    async fn dispatch_tool_approval(&self, command: &ToolApprovalCommand) -> DispatchResult {
        let node_id = self.target_node(&command.agent_name)?;
        if node_id == self.local_node_id {
            return self
                .local
                .dispatch_tool_approval(&self.team_run_id, command)
                .await
                .map_err(|e| self.local_failed(e));
        }
        self.send_remote(&node_id, self.envelopes().tool_approval(command)).await
    }

    async fn dispatch_control_stop(&self) -> DispatchResult {
        let nodes = placement_nodes(&self.placement);
        let mut failures = Vec::new();

        if nodes.contains(&self.local_node_id) {
            if let Err(e) = self.local.stop_run(&self.team_run_id).await {
                failures.push(format!("{}: {}", self.local_node_id, e));
            }
        }

        let remote_stops = nodes
            .iter()
            .filter(|node| **node != self.local_node_id)
            .map(|node| async move {
                let envelope = self.envelopes().control_stop(None);
                (node, self.remote.send_envelope(node, envelope).await)
            });
        for (node, result) in join_all(remote_stops).await {
            if let Err(e) = result {
                failures.push(format!("{}: {}", node, e));
            }
        }

        if failures.is_empty() {
            info!(team_run_id = %self.team_run_id, nodes = nodes.len(), "Run stopped on all nodes");
            Ok(())
        } else {
            warn!(team_run_id = %self.team_run_id, failures = ?failures, "Run stop incomplete");
            Err(DispatchError::new(
                DispatchErrorCode::DispatchFailed,
                format!("stop failed on {}", failures.join("; ")),
            ))
        }
    }
}

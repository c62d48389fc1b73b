//! Remote delivery over the node bridge.

use std::sync::Arc;

use async_trait::async_trait;
use teamrun_bridge::NodeBridgeClient;
use teamrun_core::{
    Envelope, EnvelopeBuilder, MemberBinding, NodeId, RunBootstrapPayload, TeamRunRecord,
};
use tracing::info;

use crate::error::{BoxError, RoutingError};
use crate::orchestrator::RoutingAdapterFactory;
use crate::routing::{
    LocalCommandDispatcher, RemoteRunBridge, TeamRoutingPort, TeamRoutingPortAdapter,
};

/// Produces the member bindings shipped with `RUN_BOOTSTRAP`.
#[async_trait]
pub trait BootstrapBindingProvider: Send + Sync {
    /// Bindings for `member_names`, all placed on one node.
    async fn member_bindings(
        &self,
        record: &TeamRunRecord,
        member_names: &[String],
    ) -> Result<Vec<MemberBinding>, BoxError>;

    /// Team the run belongs to, forwarded to workers for their own logs.
    fn runtime_team_id(&self, _record: &TeamRunRecord) -> Option<String> {
        None
    }
}

/// [`RemoteRunBridge`] for one run, backed by [`NodeBridgeClient`].
pub struct HttpRemoteRunBridge {
    record: TeamRunRecord,
    client: NodeBridgeClient,
    bindings: Arc<dyn BootstrapBindingProvider>,
}

impl HttpRemoteRunBridge {
    pub fn new(
        record: TeamRunRecord,
        client: NodeBridgeClient,
        bindings: Arc<dyn BootstrapBindingProvider>,
    ) -> Self {
        Self {
            record,
            client,
            bindings,
        }
    }

    fn members_on(&self, node_id: &NodeId) -> Vec<String> {
        self.record
            .placement_by_member
            .iter()
            .filter(|(_, p)| &p.node_id == node_id)
            .map(|(member, _)| member.clone())
            .collect()
    }
}

#[async_trait]
impl RemoteRunBridge for HttpRemoteRunBridge {
    async fn bootstrap_node(&self, node_id: &NodeId) -> Result<(), RoutingError> {
        let members = self.members_on(node_id);
        let member_bindings = self
            .bindings
            .member_bindings(&self.record, &members)
            .await
            .map_err(|e| RoutingError::Bindings(e.to_string()))?;

        let payload = RunBootstrapPayload {
            team_definition_id: self.record.team_definition_id.clone(),
            host_node_id: self.record.host_node_id.clone(),
            runtime_team_id: self.bindings.runtime_team_id(&self.record),
            member_bindings,
        };
        let envelope =
            EnvelopeBuilder::new(self.record.team_run_id.clone(), self.record.run_version)
                .run_bootstrap(payload);
        self.client.send_command(node_id, &envelope).await?;

        info!(
            team_run_id = %self.record.team_run_id,
            run_version = self.record.run_version,
            node_id = %node_id,
            members = ?members,
            "Run bootstrap sent"
        );
        Ok(())
    }

    async fn send_envelope(
        &self,
        node_id: &NodeId,
        envelope: Envelope,
    ) -> Result<(), RoutingError> {
        self.client.send_command(node_id, &envelope).await?;
        Ok(())
    }
}

/// Builds one [`TeamRoutingPortAdapter`] per run, delivering remotely over
/// HTTP.
pub struct HttpRoutingAdapterFactory {
    local_node_id: NodeId,
    local: Arc<dyn LocalCommandDispatcher>,
    client: NodeBridgeClient,
    bindings: Arc<dyn BootstrapBindingProvider>,
}

impl HttpRoutingAdapterFactory {
    pub fn new(
        local_node_id: NodeId,
        local: Arc<dyn LocalCommandDispatcher>,
        client: NodeBridgeClient,
        bindings: Arc<dyn BootstrapBindingProvider>,
    ) -> Self {
        Self {
            local_node_id,
            local,
            client,
            bindings,
        }
    }
}

impl RoutingAdapterFactory for HttpRoutingAdapterFactory {
    fn create(&self, record: &TeamRunRecord) -> Arc<dyn TeamRoutingPort> {
        let remote =
            HttpRemoteRunBridge::new(record.clone(), self.client.clone(), self.bindings.clone());
        Arc::new(TeamRoutingPortAdapter::new(
            record.team_run_id.clone(),
            record.run_version,
            self.local_node_id.clone(),
            record.placement_by_member.clone(),
            self.local.clone(),
            Arc::new(remote),
        ))
    }
}

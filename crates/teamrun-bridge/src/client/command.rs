//! Host → worker command client.

use std::sync::Arc;

use teamrun_core::{Envelope, NodeId};
use tracing::debug;

use super::SignedPoster;
use crate::auth::InternalEnvelopeAuthenticator;
use crate::directory::NodeDirectory;
use crate::error::BridgeError;
use crate::responses::CommandAccepted;
use crate::retry::RetryPolicy;
use crate::server::COMMANDS_PATH;

/// Sends envelopes to the command route of other nodes.
#[derive(Clone)]
pub struct NodeBridgeClient {
    poster: SignedPoster,
    directory: Arc<NodeDirectory>,
}

impl NodeBridgeClient {
    pub fn new(
        directory: Arc<NodeDirectory>,
        authenticator: Arc<InternalEnvelopeAuthenticator>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            poster: SignedPoster::new(authenticator, retry),
            directory,
        }
    }

    pub fn directory(&self) -> &Arc<NodeDirectory> {
        &self.directory
    }

    /// Deliver `envelope` to `node_id`.
    pub async fn send_command(
        &self,
        node_id: &NodeId,
        envelope: &Envelope,
    ) -> Result<CommandAccepted, BridgeError> {
        let base_url = self.directory.resolve_base_url(node_id)?;
        let url = format!("{}{}", base_url, COMMANDS_PATH);
        let body = envelope.to_json()?;

        debug!(
            node_id = %node_id,
            team_run_id = %envelope.team_run_id,
            kind = %envelope.kind(),
            envelope_id = %envelope.envelope_id,
            "Sending command envelope"
        );
        self.poster.post(&url, &body).await
    }
}

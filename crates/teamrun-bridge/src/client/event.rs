//! Worker → host event client.

use std::sync::Arc;

use teamrun_core::RemoteMemberEvent;
use tracing::debug;

use super::SignedPoster;
use crate::auth::InternalEnvelopeAuthenticator;
use crate::error::BridgeError;
use crate::responses::EventAccepted;
use crate::retry::RetryPolicy;
use crate::server::EVENTS_PATH;

/// Publishes member events to the host's event route.
#[derive(Clone)]
pub struct EventUplinkClient {
    poster: SignedPoster,
    host_base_url: String,
}

impl EventUplinkClient {
    pub fn new(
        host_base_url: &str,
        authenticator: Arc<InternalEnvelopeAuthenticator>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            poster: SignedPoster::new(authenticator, retry),
            host_base_url: host_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Publish one event, returning the sequence the host assigned.
    pub async fn publish(&self, event: &RemoteMemberEvent) -> Result<u64, BridgeError> {
        let url = format!("{}{}", self.host_base_url, EVENTS_PATH);
        let body = serde_json::to_value(event)?;

        debug!(
            team_run_id = %event.team_run_id,
            member = %event.member_name,
            event_type = %event.event_type,
            "Publishing member event"
        );
        let ack: EventAccepted = self.poster.post(&url, &body).await?;
        Ok(ack.sequence)
    }
}

//! Inbound internal routes.
//!
//! - `POST /internal/distributed/v1/commands` (worker side)
//! - `POST /internal/distributed/v1/events` (host side)
//!
//! Both routes verify the authentication headers against the raw JSON body
//! before parsing it into a domain type.

mod commands;
mod events;

pub use commands::command_router;
pub use events::event_router;

use async_trait::async_trait;
use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use teamrun_core::{Envelope, NodeId, RemoteMemberEvent};
use thiserror::Error;
use tracing::warn;

use crate::auth::{AuthRejection, InternalEnvelopeAuthenticator, SignedHeaders};
use crate::responses::ErrorBody;

pub const COMMANDS_PATH: &str = "/internal/distributed/v1/commands";
pub const EVENTS_PATH: &str = "/internal/distributed/v1/events";

/// A handler's refusal of an authenticated request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct CommandRejection {
    pub code: String,
    pub message: String,
}

impl CommandRejection {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Executes verified command envelopes on this node.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle_command(
        &self,
        source_node_id: NodeId,
        envelope: Envelope,
    ) -> Result<(), CommandRejection>;
}

/// Accepts verified member events on the host.
#[async_trait]
pub trait RemoteEventSink: Send + Sync {
    /// Returns the sequence assigned to the event.
    async fn accept_event(
        &self,
        source_node_id: NodeId,
        event: RemoteMemberEvent,
    ) -> Result<u64, CommandRejection>;
}

fn error_response(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
) -> Response {
    (status, Json(ErrorBody::new(code, message))).into_response()
}

/// Check the request origin, parse the body as JSON, then verify it. The
/// error side is the finished response.
fn authenticate(
    authenticator: &InternalEnvelopeAuthenticator,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(NodeId, Value), Response> {
    let signed = SignedHeaders::from_header_map(headers);
    authenticator
        .check_origin(&signed)
        .map_err(|rejection| unauthorized(&signed, rejection))?;

    let value: Value = serde_json::from_slice(body).map_err(|e| {
        error_response(StatusCode::BAD_REQUEST, "INVALID_JSON", e.to_string())
    })?;

    authenticator
        .verify(&signed, &value)
        .map(|source| (source, value))
        .map_err(|rejection| unauthorized(&signed, rejection))
}

fn unauthorized(signed: &SignedHeaders, rejection: AuthRejection) -> Response {
    warn!(
        code = %rejection.code,
        source_node = signed.node_id.as_deref().unwrap_or("-"),
        "Rejected internal request"
    );
    error_response(
        StatusCode::UNAUTHORIZED,
        rejection.code.as_str(),
        rejection.message,
    )
}

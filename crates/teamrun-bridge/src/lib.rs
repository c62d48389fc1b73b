//! TeamRun node bridge.
//!
//! Authenticated transport between the host node and worker nodes:
//!
//! - command path (host → worker): [`NodeBridgeClient`] signs and posts
//!   envelopes, [`server::command_router`] verifies and dispatches them;
//! - event path (worker → host): [`EventUplinkClient`] and
//!   [`server::event_router`].
//!
//! Both directions share the [`auth`] header scheme and the [`retry`] policy.

pub mod auth;
pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod responses;
pub mod retry;
pub mod server;

pub use auth::{
    AuthConfig, AuthMode, AuthRejection, AuthRejectionCode, InternalEnvelopeAuthenticator,
    SignedHeaders,
};
pub use client::{EventUplinkClient, NodeBridgeClient};
pub use config::BridgeArgs;
pub use directory::{NodeDirectory, NodeDirectoryEntry};
pub use error::BridgeError;
pub use responses::{CommandAccepted, ErrorBody, EventAccepted};
pub use retry::RetryPolicy;
pub use server::{
    command_router, event_router, CommandHandler, CommandRejection, RemoteEventSink, COMMANDS_PATH,
    EVENTS_PATH,
};

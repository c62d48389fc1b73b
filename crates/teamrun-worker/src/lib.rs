//! TeamRun worker node.
//!
//! Receives signed command envelopes from the host, keeps the member
//! bindings of every bound run, and hands commands to the local member
//! runtime.

pub mod binding_registry;
pub mod config;
pub mod error;
pub mod gateway;
mod http;
pub mod runtime;

pub use binding_registry::{BoundRun, RunScopedTeamBindingRegistry};
pub use config::{WorkerArgs, WorkerConfig};
pub use error::{BindingError, GatewayError, RuntimeError};
pub use gateway::RemoteMemberExecutionGateway;
pub use runtime::{EchoMemberRuntime, LocalMemberRuntime, MemberContext, MemberEventPublisher};

use std::sync::Arc;

use axum::Router;
use teamrun_bridge::{command_router, InternalEnvelopeAuthenticator};

/// Composition root of a worker node.
pub struct WorkerNode {
    pub registry: Arc<RunScopedTeamBindingRegistry>,
    pub gateway: Arc<RemoteMemberExecutionGateway>,
    pub authenticator: Arc<InternalEnvelopeAuthenticator>,
}

impl WorkerNode {
    pub fn new(config: &WorkerConfig, runtime: Arc<dyn LocalMemberRuntime>) -> Self {
        let registry = Arc::new(RunScopedTeamBindingRegistry::new());
        Self {
            gateway: Arc::new(RemoteMemberExecutionGateway::new(registry.clone(), runtime)),
            registry,
            authenticator: Arc::new(InternalEnvelopeAuthenticator::new(config.auth.clone())),
        }
    }

    /// Internal command route plus the worker's own endpoints.
    pub fn router(&self) -> Router {
        command_router(self.authenticator.clone(), self.gateway.clone())
            .merge(http::create_router(self.registry.clone()))
    }
}

//! TeamRun host node.
//!
//! Owns the run registry: places team members on nodes, routes commands to
//! local or remote members, degrades and stops failing runs, and rebroadcasts
//! events that remote members send back.

pub mod catalog;
pub mod config;
pub mod error;
pub mod events;
mod http;
pub mod local;
pub mod locator;
pub mod metrics;
pub mod orchestrator;
pub mod remote;
pub mod routing;

pub use catalog::{StaticTeamCatalog, TeamCatalogEntry};
pub use config::{HostArgs, HostConfig};
pub use error::{BoxError, CatalogError, LocatorError, OrchestratorError, RoutingError};
pub use events::{RemoteEventRebroadcastService, TeamEventAggregator, TeamEventBus};
pub use local::EchoLocalDispatcher;
pub use locator::{
    NodeSnapshotProvider, TeamDefinitionSource, TeamRunLocator, TeamRuntimeDirectory,
};
pub use orchestrator::{
    RoutingAdapterFactory, RunDependencyHydrator, RunStopListener, TeamRunOrchestrator,
};
pub use remote::{BootstrapBindingProvider, HttpRemoteRunBridge, HttpRoutingAdapterFactory};
pub use routing::{
    LocalCommandDispatcher, RemoteRunBridge, TeamRoutingPort, TeamRoutingPortAdapter,
};

use std::sync::Arc;

use axum::Router;
use teamrun_bridge::{event_router, InternalEnvelopeAuthenticator, NodeBridgeClient, NodeDirectory};
use teamrun_core::RunDegradationPolicy;

/// Composition root of a host node.
pub struct HostNode {
    pub directory: Arc<NodeDirectory>,
    pub orchestrator: Arc<TeamRunOrchestrator>,
    pub locator: Arc<TeamRunLocator>,
    pub bus: Arc<TeamEventBus>,
    pub rebroadcast: Arc<RemoteEventRebroadcastService>,
    pub authenticator: Arc<InternalEnvelopeAuthenticator>,
}

impl HostNode {
    pub fn new(
        config: &HostConfig,
        directory: Arc<NodeDirectory>,
        catalog: Arc<StaticTeamCatalog>,
        local: Arc<dyn LocalCommandDispatcher>,
    ) -> Self {
        let authenticator = Arc::new(InternalEnvelopeAuthenticator::new(config.auth.clone()));
        let client = NodeBridgeClient::new(directory.clone(), authenticator.clone(), config.retry);
        let factory = Arc::new(HttpRoutingAdapterFactory::new(
            config.node_id.clone(),
            local,
            client,
            catalog.clone(),
        ));

        let aggregator = Arc::new(TeamEventAggregator::new());
        let bus = Arc::new(TeamEventBus::new(config.event_buffer));
        let orchestrator = Arc::new(
            TeamRunOrchestrator::new(factory, RunDegradationPolicy::new(config.thresholds))
                .with_stop_listener(aggregator.clone())
                .with_stop_listener(bus.clone()),
        );
        let locator = Arc::new(
            TeamRunLocator::new(
                orchestrator.clone(),
                catalog.clone(),
                catalog,
                directory.clone(),
                config.node_id.clone(),
            )
            .with_default_node(config.default_node_id.clone()),
        );
        let rebroadcast = Arc::new(RemoteEventRebroadcastService::new(
            locator.clone(),
            aggregator,
            bus.clone(),
        ));

        Self {
            directory,
            orchestrator,
            locator,
            bus,
            rebroadcast,
            authenticator,
        }
    }

    /// Host whose own members answer through [`EchoLocalDispatcher`].
    pub fn with_echo_members(
        config: &HostConfig,
        directory: Arc<NodeDirectory>,
        catalog: Arc<StaticTeamCatalog>,
    ) -> Self {
        let local = Arc::new(EchoLocalDispatcher::new(config.node_id.clone()));
        let node = Self::new(config, directory, catalog, local.clone());
        local.attach(&node.rebroadcast);
        node
    }

    /// Internal event route plus the host's operator endpoints.
    pub fn router(&self) -> Router {
        let api = http::create_router(http::ApiState {
            orchestrator: self.orchestrator.clone(),
            locator: self.locator.clone(),
            rebroadcast: self.rebroadcast.clone(),
            bus: self.bus.clone(),
            directory: self.directory.clone(),
        });
        event_router(self.authenticator.clone(), self.rebroadcast.clone()).merge(api)
    }
}

#[cfg(test)]
mod e2e;

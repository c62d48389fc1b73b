//! TeamRun Worker Daemon

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use teamrun_bridge::{EventUplinkClient, InternalEnvelopeAuthenticator};
use teamrun_worker::{EchoMemberRuntime, WorkerArgs, WorkerNode};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("teamrun=info".parse()?))
        .with_target(true)
        .init();

    // Load config
    let config = WorkerArgs::parse().into_config();
    let addr: SocketAddr = config.bind_addr.parse()?;

    let uplink = EventUplinkClient::new(
        &config.host_base_url,
        Arc::new(InternalEnvelopeAuthenticator::new(config.auth.clone())),
        config.retry,
    );
    let runtime = Arc::new(EchoMemberRuntime::new(config.node_id.clone(), Arc::new(uplink)));
    let node = WorkerNode::new(&config, runtime);

    info!(
        node_id = %config.node_id,
        host = %config.host_base_url,
        auth_mode = %config.auth.mode,
        "Starting TeamRun worker"
    );

    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, node.router()).await?;

    Ok(())
}

//! TeamRun Host Daemon

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use teamrun_bridge::{NodeDirectory, NodeDirectoryEntry};
use teamrun_host::{HostArgs, HostNode, StaticTeamCatalog};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("teamrun=info".parse()?))
        .with_target(true)
        .init();

    // Load config
    let config = HostArgs::parse().into_config();
    let addr: SocketAddr = config.bind_addr.parse()?;

    let directory = match &config.nodes_file {
        Some(path) => NodeDirectory::load_from_file(path)?,
        None => NodeDirectory::new(),
    };
    // The host always places members on itself.
    if directory.get(&config.node_id).is_none() {
        directory.upsert(NodeDirectoryEntry::new(
            config.node_id.clone(),
            format!("http://{}", addr),
        ));
    }

    let catalog = match &config.teams_file {
        Some(path) => StaticTeamCatalog::load_from_file(path)?,
        None => {
            warn!("No teams file configured; every team lookup will fail");
            StaticTeamCatalog::default()
        }
    };

    let node = HostNode::with_echo_members(&config, Arc::new(directory), Arc::new(catalog));

    info!(
        node_id = %config.node_id,
        nodes = node.directory.len(),
        auth_mode = %config.auth.mode,
        "Starting TeamRun host"
    );

    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, node.router()).await?;

    Ok(())
}

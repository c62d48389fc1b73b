//! Worker configuration.

use clap::Parser;
use teamrun_bridge::{AuthConfig, AuthMode, BridgeArgs, RetryPolicy};
use teamrun_core::NodeId;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Id this node signs and verifies as.
    pub node_id: NodeId,

    /// HTTP bind address for the internal routes.
    pub bind_addr: String,

    /// Base URL of the host node's event route.
    pub host_base_url: String,

    pub auth: AuthConfig,

    /// Retry policy for event uplink.
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let node_id = NodeId::new("worker-1");
        Self {
            auth: AuthConfig::new(node_id.clone(), AuthMode::default()),
            node_id,
            bind_addr: "0.0.0.0:7101".to_string(),
            host_base_url: "http://127.0.0.1:7100".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Command-line arguments for the worker daemon.
#[derive(Parser, Debug)]
#[command(name = "teamrun-worker", about = "TeamRun worker node: executes remote team members")]
pub struct WorkerArgs {
    /// Node id of this worker
    #[arg(long, env = "TEAMRUN_NODE_ID", default_value = "worker-1")]
    pub node_id: String,

    /// HTTP bind address
    #[arg(long, env = "TEAMRUN_BIND_ADDR", default_value = "0.0.0.0:7101")]
    pub bind_addr: String,

    /// Base URL of the host node
    #[arg(long, env = "TEAMRUN_HOST_URL", default_value = "http://127.0.0.1:7100")]
    pub host_url: String,

    #[command(flatten)]
    pub bridge: BridgeArgs,
}

impl WorkerArgs {
    pub fn into_config(self) -> WorkerConfig {
        let node_id = NodeId::new(self.node_id);
        WorkerConfig {
            auth: self.bridge.auth_config(&node_id),
            retry: self.bridge.retry_policy(),
            node_id,
            bind_addr: self.bind_addr,
            host_base_url: self.host_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_into_config() {
        let config = WorkerArgs::parse_from([
            "teamrun-worker",
            "--node-id",
            "node-b",
            "--host-url",
            "http://host:7100",
            "--shared-secret",
            "s",
        ])
        .into_config();

        assert_eq!(config.node_id, NodeId::new("node-b"));
        assert_eq!(config.auth.local_node_id, NodeId::new("node-b"));
        assert_eq!(config.host_base_url, "http://host:7100");
        assert_eq!(config.auth.mode, AuthMode::StrictSigned);
    }
}

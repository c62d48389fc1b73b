//! Host configuration.

use std::path::PathBuf;

use clap::Parser;
use teamrun_bridge::{AuthConfig, AuthMode, BridgeArgs, RetryPolicy};
use teamrun_core::{DegradationThresholds, NodeId};

use crate::events::DEFAULT_EVENT_BUFFER;

/// Host configuration.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Id this node signs and verifies as.
    pub node_id: NodeId,

    /// HTTP bind address for operator and internal routes.
    pub bind_addr: String,

    /// JSON array of node directory entries.
    pub nodes_file: Option<PathBuf>,

    /// JSON array of team catalog entries.
    pub teams_file: Option<PathBuf>,

    /// Run-wide default node for members without placement hints.
    pub default_node_id: Option<NodeId>,

    pub thresholds: DegradationThresholds,

    /// Capacity of each team's event channel.
    pub event_buffer: usize,

    pub auth: AuthConfig,

    /// Retry policy for outbound commands.
    pub retry: RetryPolicy,
}

impl Default for HostConfig {
    fn default() -> Self {
        let node_id = NodeId::new("host");
        Self {
            auth: AuthConfig::new(node_id.clone(), AuthMode::default()),
            node_id,
            bind_addr: "0.0.0.0:7100".to_string(),
            nodes_file: None,
            teams_file: None,
            default_node_id: None,
            thresholds: DegradationThresholds::default(),
            event_buffer: DEFAULT_EVENT_BUFFER,
            retry: RetryPolicy::default(),
        }
    }
}

/// Command-line arguments for the host daemon.
#[derive(Parser, Debug)]
#[command(name = "teamrun-host", about = "TeamRun host node: places and routes team runs")]
pub struct HostArgs {
    /// Node id of this host
    #[arg(long, env = "TEAMRUN_NODE_ID", default_value = "host")]
    pub node_id: String,

    /// HTTP bind address
    #[arg(long, env = "TEAMRUN_BIND_ADDR", default_value = "0.0.0.0:7100")]
    pub bind_addr: String,

    /// Node directory file (JSON)
    #[arg(long, env = "TEAMRUN_NODES_FILE")]
    pub nodes_file: Option<PathBuf>,

    /// Team catalog file (JSON)
    #[arg(long, env = "TEAMRUN_TEAMS_FILE")]
    pub teams_file: Option<PathBuf>,

    /// Default node for members without placement hints
    #[arg(long, env = "TEAMRUN_DEFAULT_NODE_ID")]
    pub default_node_id: Option<String>,

    /// Consecutive coordinator failures before a run degrades
    #[arg(long, env = "TEAMRUN_COORDINATOR_FAILURE_THRESHOLD", default_value_t = 1)]
    pub coordinator_failure_threshold: u32,

    /// Failures on any route within the window before a run degrades
    #[arg(long, env = "TEAMRUN_GLOBAL_FAILURE_THRESHOLD", default_value_t = 3)]
    pub global_failure_threshold: u32,

    /// Window for the global failure count, in milliseconds
    #[arg(long, env = "TEAMRUN_GLOBAL_FAILURE_WINDOW_MS", default_value_t = 60_000)]
    pub global_failure_window_ms: i64,

    /// Capacity of each team's event channel
    #[arg(long, env = "TEAMRUN_EVENT_BUFFER", default_value_t = DEFAULT_EVENT_BUFFER)]
    pub event_buffer: usize,

    #[command(flatten)]
    pub bridge: BridgeArgs,
}

impl HostArgs {
    pub fn into_config(self) -> HostConfig {
        let node_id = NodeId::new(self.node_id);
        HostConfig {
            auth: self.bridge.auth_config(&node_id),
            retry: self.bridge.retry_policy(),
            node_id,
            bind_addr: self.bind_addr,
            nodes_file: self.nodes_file,
            teams_file: self.teams_file,
            default_node_id: self.default_node_id.map(NodeId::new),
            thresholds: DegradationThresholds {
                coordinator_failure_threshold: self.coordinator_failure_threshold,
                global_failure_threshold: self.global_failure_threshold,
                global_failure_window_ms: self.global_failure_window_ms,
            },
            event_buffer: self.event_buffer,
        }
    }
}

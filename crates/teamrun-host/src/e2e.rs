//! Host and worker wired over loopback through the signed internal routes.

use std::sync::Arc;
use std::time::Duration;

use teamrun_bridge::{
    AuthConfig, AuthMode, EventUplinkClient, InternalEnvelopeAuthenticator, NodeDirectory,
    NodeDirectoryEntry, RetryPolicy,
};
use teamrun_core::{
    DispatchErrorCode, NodeId, TeamDefinition, TeamId, TeamMember, ToolApprovalCommand,
    UserMessage, UserMessageCommand,
};
use teamrun_worker::{EchoMemberRuntime, WorkerConfig, WorkerNode};
use tokio::net::TcpListener;

use crate::{HostConfig, HostNode, StaticTeamCatalog, TeamCatalogEntry};

const SECRET: &str = "e2e-secret";

fn auth(node: &str) -> AuthConfig {
    AuthConfig::new(node, AuthMode::StrictSigned).with_signing_secret("default", SECRET)
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(10),
        jitter_ratio: 0.0,
    }
}

struct Cluster {
    host: HostNode,
    worker: WorkerNode,
}

async fn start_cluster() -> Cluster {
    let host_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let worker_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let host_url = format!("http://{}", host_listener.local_addr().unwrap());
    let worker_url = format!("http://{}", worker_listener.local_addr().unwrap());

    let worker_config = WorkerConfig {
        node_id: NodeId::new("node-b"),
        host_base_url: host_url.clone(),
        auth: auth("node-b"),
        retry: fast_retry(),
        ..WorkerConfig::default()
    };
    let uplink = EventUplinkClient::new(
        &host_url,
        Arc::new(InternalEnvelopeAuthenticator::new(worker_config.auth.clone())),
        worker_config.retry,
    );
    let runtime = Arc::new(EchoMemberRuntime::new(NodeId::new("node-b"), Arc::new(uplink)));
    let worker = WorkerNode::new(&worker_config, runtime);

    let host_config = HostConfig {
        node_id: NodeId::new("node-host"),
        auth: auth("node-host"),
        retry: fast_retry(),
        ..HostConfig::default()
    };
    let directory = Arc::new(NodeDirectory::from_entries([
        NodeDirectoryEntry::new("node-host", host_url),
        NodeDirectoryEntry::new("node-b", worker_url),
    ]));
    let catalog = StaticTeamCatalog::from_entries([TeamCatalogEntry::new(
        "team-1",
        TeamDefinition::new("def-1", "lead")
            .with_member(TeamMember::agent("lead", "agent-lead"))
            .with_member(TeamMember::agent("writer", "agent-writer").with_home_node("node-b"))
            .with_member(TeamMember::agent("critic", "agent-critic").with_home_node("node-b")),
    )])
    .unwrap();
    let host = HostNode::with_echo_members(&host_config, directory, Arc::new(catalog));

    let host_app = host.router();
    let worker_app = worker.router();
    tokio::spawn(async move { axum::serve(host_listener, host_app).await });
    tokio::spawn(async move { axum::serve(worker_listener, worker_app).await });

    Cluster { host, worker }
}

fn message(member: &str, content: &str) -> UserMessageCommand {
    UserMessageCommand {
        target_member_name: member.to_string(),
        user_message: UserMessage::new(content),
    }
}

#[tokio::test]
async fn test_remote_member_round_trip() {
    let cluster = start_cluster().await;
    let team = TeamId::new("team-1");
    let mut events = cluster.host.bus.subscribe(&team);

    let run = cluster.host.locator.resolve_or_create_run(&team).await.unwrap();
    cluster
        .host
        .orchestrator
        .dispatch_user_message(&run.team_run_id, &message("writer", "hi"))
        .await
        .unwrap();

    let bound = cluster.worker.registry.get(&run.team_run_id).unwrap();
    assert_eq!(bound.run_version, run.run_version);
    assert_eq!(
        bound.bindings.keys().map(String::as_str).collect::<Vec<_>>(),
        ["critic", "writer"]
    );

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.sequence, 1);
    assert_eq!(event.team_run_id, run.team_run_id);
    assert_eq!(event.event.source_node_id, NodeId::new("node-b"));
    assert_eq!(event.event.event_type, "ASSISTANT_MESSAGE");
    assert_eq!(event.event.payload["content"], "echo: hi");

    // Second member on the same node reuses the bootstrap.
    cluster
        .host
        .orchestrator
        .dispatch_tool_approval(
            &run.team_run_id,
            &ToolApprovalCommand {
                agent_name: "critic".to_string(),
                tool_invocation_id: "tool-1".to_string(),
                is_approved: true,
                reason: None,
            },
        )
        .await
        .unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.sequence, 2);
    assert_eq!(event.event.event_type, "TOOL_APPROVAL_APPLIED");
}

#[tokio::test]
async fn test_stop_unbinds_worker_and_restart_rebootstraps() {
    let cluster = start_cluster().await;
    let team = TeamId::new("team-1");

    let first = cluster.host.locator.resolve_or_create_run(&team).await.unwrap();
    cluster
        .host
        .orchestrator
        .dispatch_user_message(&first.team_run_id, &message("writer", "one"))
        .await
        .unwrap();
    assert_eq!(cluster.worker.registry.len(), 1);

    cluster
        .host
        .orchestrator
        .dispatch_control_stop(&first.team_run_id)
        .await
        .unwrap();
    assert!(cluster.worker.registry.is_empty());
    assert!(cluster.host.orchestrator.get_run_record(&first.team_run_id).await.is_none());

    let second = cluster.host.locator.resolve_or_create_run(&team).await.unwrap();
    assert_eq!(second.run_version, first.run_version + 1);
    cluster
        .host
        .orchestrator
        .dispatch_user_message(&second.team_run_id, &message("writer", "two"))
        .await
        .unwrap();
    let bound = cluster.worker.registry.get(&second.team_run_id).unwrap();
    assert_eq!(bound.run_version, second.run_version);
}

#[tokio::test]
async fn test_local_and_unplaced_members() {
    let cluster = start_cluster().await;
    let team = TeamId::new("team-1");
    let mut events = cluster.host.bus.subscribe(&team);
    let run = cluster.host.locator.resolve_or_create_run(&team).await.unwrap();

    cluster
        .host
        .orchestrator
        .dispatch_user_message(&run.team_run_id, &message("lead", "local"))
        .await
        .unwrap();
    assert!(cluster.worker.registry.is_empty());

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.event.source_node_id, NodeId::new("node-host"));
    assert_eq!(event.event.member_name, "lead");
    assert_eq!(event.event.payload["content"], "echo: local");

    let err = cluster
        .host
        .orchestrator
        .dispatch_user_message(&run.team_run_id, &message("ghost", "?"))
        .await
        .unwrap_err();
    assert_eq!(err.code, DispatchErrorCode::TargetMemberNotPlaced);
}

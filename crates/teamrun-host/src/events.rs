//! Remote member events on the host.
//!
//! Accepted events are validated against the run registry, sequenced per run
//! and source node, and fanned out to the team's local event stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use teamrun_bridge::{CommandRejection, RemoteEventSink};
use teamrun_core::{NodeId, RemoteMemberEvent, SequencedTeamEvent, TeamId, TeamRunId, TeamRunRecord};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::locator::TeamRunLocator;
use crate::orchestrator::RunStopListener;

/// Default capacity of each team's broadcast channel.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Per-run, per-source sequence counters.
#[derive(Default)]
pub struct TeamEventAggregator {
    sequences: Mutex<HashMap<(TeamRunId, NodeId), u64>>,
}

impl TeamEventAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next sequence for `(team_run_id, source_node_id)`, starting at 1.
    pub fn next_sequence(&self, team_run_id: &TeamRunId, source_node_id: &NodeId) -> u64 {
        self.sequence_with(team_run_id, source_node_id, |_| ()).0
    }

    /// Assign the next sequence and run `publish` with it before the counter
    /// is released, so events leave in sequence order.
    pub fn sequence_with<T>(
        &self,
        team_run_id: &TeamRunId,
        source_node_id: &NodeId,
        publish: impl FnOnce(u64) -> T,
    ) -> (u64, T) {
        let mut sequences = self.sequences.lock().unwrap_or_else(PoisonError::into_inner);
        let counter = sequences
            .entry((team_run_id.clone(), source_node_id.clone()))
            .or_insert(0);
        *counter += 1;
        let sequence = *counter;
        (sequence, publish(sequence))
    }

    /// Drop every counter of a run.
    pub fn forget_run(&self, team_run_id: &TeamRunId) {
        self.sequences
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(run_id, _), _| run_id != team_run_id);
    }
}

impl RunStopListener for TeamEventAggregator {
    fn run_stopped(&self, record: &TeamRunRecord) {
        self.forget_run(&record.team_run_id);
    }
}

/// Local event streams, one broadcast channel per team.
pub struct TeamEventBus {
    capacity: usize,
    channels: RwLock<HashMap<TeamId, broadcast::Sender<SequencedTeamEvent>>>,
}

impl TeamEventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: RwLock::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self, team_id: &TeamId) -> broadcast::Receiver<SequencedTeamEvent> {
        self.sender(team_id).subscribe()
    }

    /// Publish to the team's subscribers. Returns how many received it.
    pub fn publish(&self, event: SequencedTeamEvent) -> usize {
        let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        match channels.get(&event.team_id) {
            Some(sender) => sender.send(event).unwrap_or(0),
            None => 0,
        }
    }

    /// Drop the channels nobody listens to. Returns how many were dropped.
    pub fn prune_idle(&self) -> usize {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        let before = channels.len();
        channels.retain(|_, sender| sender.receiver_count() > 0);
        before - channels.len()
    }

    fn sender(&self, team_id: &TeamId) -> broadcast::Sender<SequencedTeamEvent> {
        if let Some(sender) = self
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(team_id)
        {
            return sender.clone();
        }
        self.channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(team_id.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

#[cfg(test)]
impl TeamEventBus {
    fn channel_count(&self) -> usize {
        self.channels.read().unwrap().len()
    }
}

impl RunStopListener for TeamEventBus {
    fn run_stopped(&self, record: &TeamRunRecord) {
        let dropped = self.prune_idle();
        if dropped > 0 {
            debug!(team_run_id = %record.team_run_id, dropped, "Idle team event channels dropped");
        }
    }
}

impl Default for TeamEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER)
    }
}

/// Counters exported on `/metrics`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebroadcastStats {
    pub accepted: u64,
    pub rejected: u64,
}

/// Host-side sink of the event uplink.
pub struct RemoteEventRebroadcastService {
    locator: Arc<TeamRunLocator>,
    aggregator: Arc<TeamEventAggregator>,
    bus: Arc<TeamEventBus>,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

impl RemoteEventRebroadcastService {
    pub fn new(
        locator: Arc<TeamRunLocator>,
        aggregator: Arc<TeamEventAggregator>,
        bus: Arc<TeamEventBus>,
    ) -> Self {
        Self {
            locator,
            aggregator,
            bus,
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> RebroadcastStats {
        RebroadcastStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    /// Sequence and publish an event produced by a member running on this
    /// host. Not counted in [`stats`](Self::stats).
    pub async fn publish_local(
        &self,
        source_node_id: &NodeId,
        team_run_id: &TeamRunId,
        member_name: &str,
        event_type: &str,
        payload: Value,
    ) -> Result<u64, CommandRejection> {
        let record = self
            .locator
            .resolve_by_team_run_id(team_run_id)
            .await
            .ok_or_else(|| run_not_found(team_run_id))?;
        self.sequence(RemoteMemberEvent {
            team_run_id: record.team_run_id.clone(),
            run_version: record.run_version,
            source_node_id: source_node_id.clone(),
            source_event_id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.to_string(),
            member_name: member_name.to_string(),
            agent_id: format!("{}:{}", record.team_run_id, member_name),
            payload,
        })
        .await
    }

    async fn sequence(&self, event: RemoteMemberEvent) -> Result<u64, CommandRejection> {
        let record = self
            .locator
            .resolve_by_team_run_id(&event.team_run_id)
            .await
            .ok_or_else(|| run_not_found(&event.team_run_id))?;
        if record.run_version != event.run_version {
            return Err(CommandRejection::new(
                "INVALID_RUN_VERSION",
                format!(
                    "event for version {} but run '{}' is at version {}",
                    event.run_version, record.team_run_id, record.run_version
                ),
            ));
        }

        // Runs started outside the locator stream under their definition id.
        let team_id = self
            .locator
            .team_id_for_run(&record.team_run_id)
            .unwrap_or_else(|| TeamId::new(record.team_definition_id.as_str()));
        let team_run_id = event.team_run_id.clone();
        let source_node_id = event.source_node_id.clone();
        let (sequence, receivers) =
            self.aggregator
                .sequence_with(&team_run_id, &source_node_id, |sequence| {
                    self.bus.publish(SequencedTeamEvent {
                        team_id,
                        team_run_id: record.team_run_id,
                        sequence,
                        received_at: Utc::now(),
                        event,
                    })
                });
        debug!(sequence, receivers, "Remote event rebroadcast");
        Ok(sequence)
    }
}

fn run_not_found(team_run_id: &TeamRunId) -> CommandRejection {
    CommandRejection::new("RUN_NOT_FOUND", format!("run '{}' is not active", team_run_id))
}

#[async_trait]
impl RemoteEventSink for RemoteEventRebroadcastService {
    async fn accept_event(
        &self,
        source_node_id: NodeId,
        event: RemoteMemberEvent,
    ) -> Result<u64, CommandRejection> {
        let team_run_id = event.team_run_id.clone();
        let event_type = event.event_type.clone();
        match self.sequence(event).await {
            Ok(sequence) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                Ok(sequence)
            }
            Err(rejection) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    team_run_id = %team_run_id,
                    node_id = %source_node_id,
                    event_type = %event_type,
                    code = %rejection.code,
                    "Remote event rejected"
                );
                Err(rejection)
            }
        }
    }
}

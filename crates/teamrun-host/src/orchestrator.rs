//! Team run registry and lifecycle.
//!
//! The orchestrator owns every active run on this host: it starts runs,
//! routes commands through each run's routing port, feeds outcomes to the
//! degradation policy, and stops runs. Registry mutations happen under one
//! async mutex; command delivery itself runs outside the lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::Utc;
use teamrun_core::{
    resolve_placement, DegradationAction, DispatchError, DispatchErrorCode, DispatchResult,
    InterAgentMessageCommand, NodeId, PlacementCandidateNode, RunDegradationPolicy,
    RunDegradationState, RunStatus, TeamDefinition, TeamDefinitionId, TeamRunId, TeamRunRecord,
    ToolApprovalCommand, UserMessageCommand,
};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::{BoxError, OrchestratorError};
use crate::routing::TeamRoutingPort;

/// Builds the routing port of a new run. Called exactly once per run.
pub trait RoutingAdapterFactory: Send + Sync {
    fn create(&self, record: &TeamRunRecord) -> Arc<dyn TeamRoutingPort>;
}

/// Prepares whatever a definition needs before its first run starts
/// (agent definitions, prompts, tool configuration).
#[async_trait]
pub trait RunDependencyHydrator: Send + Sync {
    async fn hydrate(&self, definition: &TeamDefinition) -> Result<(), BoxError>;
}

/// Notified after a run leaves the registry.
pub trait RunStopListener: Send + Sync {
    fn run_stopped(&self, record: &TeamRunRecord);
}

struct RunEntry {
    record: TeamRunRecord,
    adapter: Arc<dyn TeamRoutingPort>,
    degradation: RunDegradationState,
}

#[derive(Default)]
struct Registry {
    runs: HashMap<TeamRunId, RunEntry>,
    by_definition: HashMap<TeamDefinitionId, TeamRunId>,
    /// Last version issued per definition. Survives run removal.
    last_version: HashMap<TeamDefinitionId, u64>,
}

impl Registry {
    fn remove(&mut self, team_run_id: &TeamRunId) -> Option<RunEntry> {
        let entry = self.runs.remove(team_run_id)?;
        if self.by_definition.get(&entry.record.team_definition_id) == Some(team_run_id) {
            self.by_definition.remove(&entry.record.team_definition_id);
        }
        Some(entry)
    }
}

/// Host-side registry of team runs.
pub struct TeamRunOrchestrator {
    registry: Mutex<Registry>,
    /// One gate per definition with a start in progress.
    start_gates: StdMutex<HashMap<TeamDefinitionId, Arc<Mutex<()>>>>,
    factory: Arc<dyn RoutingAdapterFactory>,
    hydrator: Option<Arc<dyn RunDependencyHydrator>>,
    policy: RunDegradationPolicy,
    stop_listeners: Vec<Arc<dyn RunStopListener>>,
}

impl TeamRunOrchestrator {
    pub fn new(factory: Arc<dyn RoutingAdapterFactory>, policy: RunDegradationPolicy) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            start_gates: StdMutex::new(HashMap::new()),
            factory,
            hydrator: None,
            policy,
            stop_listeners: Vec::new(),
        }
    }

    pub fn with_hydrator(mut self, hydrator: Arc<dyn RunDependencyHydrator>) -> Self {
        self.hydrator = Some(hydrator);
        self
    }

    pub fn with_stop_listener(mut self, listener: Arc<dyn RunStopListener>) -> Self {
        self.stop_listeners.push(listener);
        self
    }

    /// Return the active run of `definition`, starting one if there is none.
    ///
    /// Concurrent starts of one definition share a gate so exactly one run is
    /// created. Hydration and placement run outside the registry lock.
    pub async fn start_run_if_missing(
        &self,
        definition: &TeamDefinition,
        host_node_id: &NodeId,
        node_snapshots: &[PlacementCandidateNode],
        default_node_id: Option<&NodeId>,
    ) -> Result<TeamRunRecord, OrchestratorError> {
        if let Some(record) = self.active_run_for_definition(&definition.id).await {
            return Ok(record);
        }

        let gate = self.start_gate(&definition.id);
        let result = {
            let _starting = gate.lock().await;
            self.start_gated(definition, host_node_id, node_snapshots, default_node_id)
                .await
        };
        self.release_start_gate(&definition.id, gate);
        result
    }

    async fn start_gated(
        &self,
        definition: &TeamDefinition,
        host_node_id: &NodeId,
        node_snapshots: &[PlacementCandidateNode],
        default_node_id: Option<&NodeId>,
    ) -> Result<TeamRunRecord, OrchestratorError> {
        if let Some(record) = self.active_run_for_definition(&definition.id).await {
            return Ok(record);
        }

        definition.validate()?;
        if let Some(hydrator) = &self.hydrator {
            hydrator
                .hydrate(definition)
                .await
                .map_err(|e| OrchestratorError::Hydration {
                    definition: definition.id.clone(),
                    reason: e.to_string(),
                })?;
        }
        let placement_by_member =
            resolve_placement(definition, host_node_id, node_snapshots, default_node_id)?;

        let mut registry = self.registry.lock().await;
        let run_version = registry.last_version.get(&definition.id).copied().unwrap_or(0) + 1;
        let record = TeamRunRecord {
            team_run_id: TeamRunId::generate(),
            team_definition_id: definition.id.clone(),
            run_version,
            host_node_id: host_node_id.clone(),
            status: RunStatus::Active,
            placement_by_member,
            coordinator_member_name: definition.coordinator_member_name.clone(),
            created_at: Utc::now(),
        };
        let adapter = self.factory.create(&record);

        info!(
            team_run_id = %record.team_run_id,
            team_definition_id = %record.team_definition_id,
            run_version,
            placement = ?record
                .placement_by_member
                .iter()
                .map(|(m, p)| format!("{}@{}", m, p.node_id))
                .collect::<Vec<_>>(),
            "Team run started"
        );

        registry.last_version.insert(definition.id.clone(), run_version);
        registry
            .by_definition
            .insert(definition.id.clone(), record.team_run_id.clone());
        registry.runs.insert(
            record.team_run_id.clone(),
            RunEntry {
                record: record.clone(),
                adapter,
                degradation: RunDegradationState::default(),
            },
        );
        Ok(record)
    }

    pub async fn dispatch_user_message(
        &self,
        team_run_id: &TeamRunId,
        command: &UserMessageCommand,
    ) -> DispatchResult {
        let (adapter, is_coordinator) = self.route(team_run_id, &command.target_member_name).await?;
        let result = adapter.dispatch_user_message(command).await;
        self.settle(team_run_id, is_coordinator, result).await
    }

    pub async fn dispatch_inter_agent_message(
        &self,
        team_run_id: &TeamRunId,
        command: &InterAgentMessageCommand,
    ) -> DispatchResult {
        let (adapter, is_coordinator) = self.route(team_run_id, &command.recipient_name).await?;
        let result = adapter.dispatch_inter_agent_message_request(command).await;
        self.settle(team_run_id, is_coordinator, result).await
    }

    pub async fn dispatch_tool_approval(
        &self,
        team_run_id: &TeamRunId,
        command: &ToolApprovalCommand,
    ) -> DispatchResult {
        let (adapter, is_coordinator) = self.route(team_run_id, &command.agent_name).await?;
        let result = adapter.dispatch_tool_approval(command).await;
        self.settle(team_run_id, is_coordinator, result).await
    }

    /// Stop the run everywhere. The record is removed only when every node
    /// acknowledged the stop.
    pub async fn dispatch_control_stop(&self, team_run_id: &TeamRunId) -> DispatchResult {
        let adapter = {
            let registry = self.registry.lock().await;
            registry
                .runs
                .get(team_run_id)
                .map(|entry| entry.adapter.clone())
                .ok_or_else(|| run_not_found(team_run_id))?
        };

        adapter.dispatch_control_stop().await?;

        let removed = self.registry.lock().await.remove(team_run_id);
        if let Some(entry) = removed {
            info!(team_run_id = %team_run_id, "Team run stopped");
            self.notify_stopped(&entry.record);
        }
        Ok(())
    }

    pub async fn get_run_record(&self, team_run_id: &TeamRunId) -> Option<TeamRunRecord> {
        self.registry
            .lock()
            .await
            .runs
            .get(team_run_id)
            .map(|entry| entry.record.clone())
    }

    /// All registered runs, oldest first.
    pub async fn list_run_records(&self) -> Vec<TeamRunRecord> {
        let mut records: Vec<TeamRunRecord> = self
            .registry
            .lock()
            .await
            .runs
            .values()
            .map(|entry| entry.record.clone())
            .collect();
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.team_run_id.cmp(&b.team_run_id))
        });
        records
    }

    pub async fn active_run_for_definition(
        &self,
        team_definition_id: &TeamDefinitionId,
    ) -> Option<TeamRunRecord> {
        let registry = self.registry.lock().await;
        registry
            .by_definition
            .get(team_definition_id)
            .and_then(|run_id| registry.runs.get(run_id))
            .map(|entry| entry.record.clone())
    }

    fn start_gate(&self, team_definition_id: &TeamDefinitionId) -> Arc<Mutex<()>> {
        let mut gates = self.start_gates.lock().unwrap_or_else(|e| e.into_inner());
        gates
            .entry(team_definition_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release_start_gate(&self, team_definition_id: &TeamDefinitionId, gate: Arc<Mutex<()>>) {
        let mut gates = self.start_gates.lock().unwrap_or_else(|e| e.into_inner());
        // Only the map and this caller hold it: nobody else is starting.
        if Arc::strong_count(&gate) == 2 {
            gates.remove(team_definition_id);
        }
    }

    async fn route(
        &self,
        team_run_id: &TeamRunId,
        member_name: &str,
    ) -> Result<(Arc<dyn TeamRoutingPort>, bool), DispatchError> {
        let registry = self.registry.lock().await;
        let entry = registry
            .runs
            .get(team_run_id)
            .ok_or_else(|| run_not_found(team_run_id))?;
        Ok((entry.adapter.clone(), entry.record.is_coordinator(member_name)))
    }

    /// Feed a dispatch outcome to the degradation policy.
    async fn settle(
        &self,
        team_run_id: &TeamRunId,
        is_coordinator_route: bool,
        result: DispatchResult,
    ) -> DispatchResult {
        let mut registry = self.registry.lock().await;
        let Some(entry) = registry.runs.get_mut(team_run_id) else {
            // Stopped while the command was in flight.
            return result;
        };

        let error = match result {
            Ok(()) => {
                self.policy.record_success(&mut entry.degradation);
                return Ok(());
            }
            // Placement errors are the caller's fault, not the run's.
            Err(error) if error.code != DispatchErrorCode::DispatchFailed => return Err(error),
            Err(error) => error,
        };

        let action = self.policy.record_failure(
            &mut entry.degradation,
            is_coordinator_route,
            entry.record.status,
            Utc::now().timestamp_millis(),
        );
        match action {
            DegradationAction::None => Err(error),
            DegradationAction::Degrade => {
                entry.record.status = RunStatus::Degraded;
                warn!(
                    team_run_id = %team_run_id,
                    is_coordinator_route,
                    error = %error,
                    "Team run degraded"
                );
                Err(error)
            }
            DegradationAction::AutoStop => {
                let Some(entry) = registry.remove(team_run_id) else {
                    return Err(error);
                };
                drop(registry);

                if let Err(stop_error) = entry.adapter.dispatch_control_stop().await {
                    error!(
                        team_run_id = %team_run_id,
                        error = %stop_error,
                        "Auto-stop did not reach every node; run removed anyway"
                    );
                }
                warn!(team_run_id = %team_run_id, error = %error, "Team run auto-stopped");
                self.notify_stopped(&entry.record);

                Err(DispatchError::new(
                    DispatchErrorCode::RunAutoStopped,
                    format!("run '{}' was auto-stopped after: {}", team_run_id, error),
                ))
            }
        }
    }

    fn notify_stopped(&self, record: &TeamRunRecord) {
        for listener in &self.stop_listeners {
            listener.run_stopped(record);
        }
    }
}

fn run_not_found(team_run_id: &TeamRunId) -> DispatchError {
    DispatchError::new(
        DispatchErrorCode::RunNotFound,
        format!("run '{}' is not active", team_run_id),
    )
}

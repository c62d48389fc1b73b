//! Team-to-run resolution.
//!
//! Callers address teams by [`TeamId`]; the orchestrator addresses runs by
//! [`TeamRunId`]. The locator keeps a cache between the two and always
//! re-validates it against the orchestrator before answering.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use teamrun_bridge::NodeDirectory;
use teamrun_core::{
    NodeId, PlacementCandidateNode, RunStatus, TeamDefinition, TeamDefinitionId, TeamId, TeamRunId,
    TeamRunRecord,
};
use tracing::{debug, info};

use crate::error::{BoxError, LocatorError};
use crate::orchestrator::TeamRunOrchestrator;

/// Loads team definitions by id.
#[async_trait]
pub trait TeamDefinitionSource: Send + Sync {
    async fn get_team_definition(
        &self,
        id: &TeamDefinitionId,
    ) -> Result<Option<TeamDefinition>, BoxError>;
}

/// Host-local view of the teams that exist in the runtime.
#[async_trait]
pub trait TeamRuntimeDirectory: Send + Sync {
    async fn team_exists(&self, team_id: &TeamId) -> bool;

    /// Members the runtime currently knows for the team.
    async fn team_member_names(&self, team_id: &TeamId) -> Vec<String>;

    async fn team_definition_id(&self, team_id: &TeamId) -> Option<TeamDefinitionId>;
}

/// Source of node health at run start.
pub trait NodeSnapshotProvider: Send + Sync {
    fn snapshot(&self) -> Vec<PlacementCandidateNode>;
}

impl NodeSnapshotProvider for NodeDirectory {
    fn snapshot(&self) -> Vec<PlacementCandidateNode> {
        self.placement_snapshot()
    }
}

#[derive(Debug, Clone)]
struct CachedRun {
    team_run_id: TeamRunId,
    run_version: u64,
}

#[derive(Default)]
struct LocatorCache {
    by_team: HashMap<TeamId, CachedRun>,
    by_run: HashMap<TeamRunId, TeamId>,
    /// Highest version handed out per team.
    last_seen: HashMap<TeamId, u64>,
}

impl LocatorCache {
    fn insert(&mut self, team_id: &TeamId, record: &TeamRunRecord) {
        if let Some(previous) = self.by_team.insert(
            team_id.clone(),
            CachedRun {
                team_run_id: record.team_run_id.clone(),
                run_version: record.run_version,
            },
        ) {
            if previous.team_run_id != record.team_run_id {
                self.by_run.remove(&previous.team_run_id);
            }
        }
        self.by_run.insert(record.team_run_id.clone(), team_id.clone());
        let last = self.last_seen.entry(team_id.clone()).or_insert(0);
        *last = (*last).max(record.run_version);
    }

    fn evict(&mut self, team_id: &TeamId) {
        if let Some(cached) = self.by_team.remove(team_id) {
            self.by_run.remove(&cached.team_run_id);
        }
    }
}

/// Resolves teams to live runs, starting runs on demand.
pub struct TeamRunLocator {
    orchestrator: Arc<TeamRunOrchestrator>,
    definitions: Arc<dyn TeamDefinitionSource>,
    runtime: Arc<dyn TeamRuntimeDirectory>,
    nodes: Arc<dyn NodeSnapshotProvider>,
    host_node_id: NodeId,
    default_node_id: Option<NodeId>,
    cache: Mutex<LocatorCache>,
}

impl TeamRunLocator {
    pub fn new(
        orchestrator: Arc<TeamRunOrchestrator>,
        definitions: Arc<dyn TeamDefinitionSource>,
        runtime: Arc<dyn TeamRuntimeDirectory>,
        nodes: Arc<dyn NodeSnapshotProvider>,
        host_node_id: NodeId,
    ) -> Self {
        Self {
            orchestrator,
            definitions,
            runtime,
            nodes,
            host_node_id,
            default_node_id: None,
            cache: Mutex::new(LocatorCache::default()),
        }
    }

    pub fn with_default_node(mut self, node_id: Option<NodeId>) -> Self {
        self.default_node_id = node_id;
        self
    }

    pub fn orchestrator(&self) -> &Arc<TeamRunOrchestrator> {
        &self.orchestrator
    }

    /// Return the team's live run, starting one when none is active.
    pub async fn resolve_or_create_run(
        &self,
        team_id: &TeamId,
    ) -> Result<TeamRunRecord, LocatorError> {
        if !self.runtime.team_exists(team_id).await {
            return Err(LocatorError::TeamNotFound(team_id.clone()));
        }
        let definition = self.load_definition(team_id).await?;
        self.check_members(team_id, &definition).await?;

        if let Some(record) = self.cached_live_run(team_id).await {
            return Ok(record);
        }

        let snapshot = self.nodes.snapshot();
        if snapshot.is_empty() {
            return Err(LocatorError::NodeSnapshotEmpty);
        }

        let record = self
            .orchestrator
            .start_run_if_missing(
                &definition,
                &self.host_node_id,
                &snapshot,
                self.default_node_id.as_ref(),
            )
            .await?;
        self.accept(team_id, &record)?;

        info!(
            team_id = %team_id,
            team_run_id = %record.team_run_id,
            run_version = record.run_version,
            "Team resolved to run"
        );
        Ok(record)
    }

    /// The team's live run, if any. Never starts a run.
    pub async fn resolve_active_run(&self, team_id: &TeamId) -> Option<TeamRunRecord> {
        if let Some(record) = self.cached_live_run(team_id).await {
            return Some(record);
        }

        let definition_id = self.runtime.team_definition_id(team_id).await?;
        let record = self
            .orchestrator
            .active_run_for_definition(&definition_id)
            .await
            .filter(|r| r.status != RunStatus::Stopped)?;
        self.lock().insert(team_id, &record);
        Some(record)
    }

    /// The orchestrator's current record for `team_run_id`.
    pub async fn resolve_by_team_run_id(&self, team_run_id: &TeamRunId) -> Option<TeamRunRecord> {
        let record = self.orchestrator.get_run_record(team_run_id).await;
        let mut cache = self.lock();
        let team_id = cache.by_run.get(team_run_id).cloned();
        match (&record, team_id) {
            (None, Some(team_id)) => {
                debug!(team_run_id = %team_run_id, "Dropping cached mapping of removed run");
                cache.evict(&team_id);
            }
            (Some(record), Some(team_id)) => cache.insert(&team_id, record),
            _ => {}
        }
        record
    }

    /// Team a run was resolved for, if this locator resolved it.
    pub fn team_id_for_run(&self, team_run_id: &TeamRunId) -> Option<TeamId> {
        self.lock().by_run.get(team_run_id).cloned()
    }

    async fn load_definition(&self, team_id: &TeamId) -> Result<TeamDefinition, LocatorError> {
        let definition_id = self.runtime.team_definition_id(team_id).await.ok_or_else(|| {
            LocatorError::TeamDefinitionUnavailable {
                team_id: team_id.clone(),
                reason: "team has no definition id".to_string(),
            }
        })?;
        self.definitions
            .get_team_definition(&definition_id)
            .await
            .map_err(|e| LocatorError::TeamDefinitionUnavailable {
                team_id: team_id.clone(),
                reason: e.to_string(),
            })?
            .ok_or(LocatorError::TeamDefinitionNotFound(definition_id))
    }

    /// Runtime members must be a subset of the definition's members.
    async fn check_members(
        &self,
        team_id: &TeamId,
        definition: &TeamDefinition,
    ) -> Result<(), LocatorError> {
        let declared: BTreeSet<&str> = definition.member_names().collect();
        let runtime = self.runtime.team_member_names(team_id).await;
        if runtime.iter().all(|name| declared.contains(name.as_str())) {
            return Ok(());
        }
        Err(LocatorError::TeamDefinitionMemberMismatch {
            team_id: team_id.clone(),
            runtime,
            definition: declared.into_iter().map(str::to_string).collect(),
        })
    }

    /// Cached run, if the orchestrator still has it live at the same version.
    async fn cached_live_run(&self, team_id: &TeamId) -> Option<TeamRunRecord> {
        let cached = self.lock().by_team.get(team_id).cloned()?;
        let record = self.orchestrator.get_run_record(&cached.team_run_id).await;

        let mut cache = self.lock();
        match record {
            Some(record)
                if record.status != RunStatus::Stopped
                    && record.run_version == cached.run_version =>
            {
                Some(record)
            }
            _ => {
                debug!(
                    team_id = %team_id,
                    team_run_id = %cached.team_run_id,
                    "Cached run is stale"
                );
                cache.evict(team_id);
                None
            }
        }
    }

    fn accept(&self, team_id: &TeamId, record: &TeamRunRecord) -> Result<(), LocatorError> {
        let mut cache = self.lock();
        let last_seen = cache.last_seen.get(team_id).copied().unwrap_or(0);
        let reused = cache
            .by_team
            .get(team_id)
            .is_some_and(|c| c.team_run_id == record.team_run_id);
        if record.run_version == 0 || (!reused && record.run_version < last_seen) {
            return Err(LocatorError::InvalidRunVersion {
                team_run_id: record.team_run_id.clone(),
                run_version: record.run_version,
                last_seen,
            });
        }
        cache.insert(team_id, record);
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LocatorCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

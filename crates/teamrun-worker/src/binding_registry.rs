//! Member bindings per bound run.
//!
//! A run is bound by `RUN_BOOTSTRAP` and unbound by `CONTROL_STOP`. Only one
//! generation of a run is bound at a time; a newer bootstrap supersedes the
//! older one.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use teamrun_core::{MemberBinding, NodeId, RunBootstrapPayload, TeamDefinitionId, TeamRunId};
use tracing::info;

use crate::error::BindingError;

/// One bound run generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundRun {
    pub team_run_id: TeamRunId,
    pub run_version: u64,
    pub team_definition_id: TeamDefinitionId,
    pub host_node_id: NodeId,
    pub runtime_team_id: Option<String>,
    /// Keyed by member name.
    pub bindings: BTreeMap<String, MemberBinding>,
    pub bound_at: DateTime<Utc>,
}

impl BoundRun {
    pub fn from_bootstrap(
        team_run_id: TeamRunId,
        run_version: u64,
        payload: RunBootstrapPayload,
    ) -> Self {
        Self {
            team_run_id,
            run_version,
            team_definition_id: payload.team_definition_id,
            host_node_id: payload.host_node_id,
            runtime_team_id: payload.runtime_team_id,
            bindings: payload
                .member_bindings
                .into_iter()
                .map(|b| (b.member_name.clone(), b))
                .collect(),
            bound_at: Utc::now(),
        }
    }
}

/// Run-scoped binding registry.
#[derive(Debug, Default)]
pub struct RunScopedTeamBindingRegistry {
    runs: RwLock<HashMap<TeamRunId, BoundRun>>,
}

impl RunScopedTeamBindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `run`, replacing any older generation of the same run.
    ///
    /// Re-binding the same version replaces the bindings. Returns the version
    /// that was superseded, if any.
    pub fn register(&self, run: BoundRun) -> Result<Option<u64>, BindingError> {
        let mut runs = self.write();
        let previous = runs.get(&run.team_run_id).map(|r| r.run_version);
        if let Some(bound) = previous {
            if run.run_version < bound {
                return Err(BindingError::StaleBootstrap {
                    team_run_id: run.team_run_id.clone(),
                    bound,
                    received: run.run_version,
                });
            }
        }
        info!(
            team_run_id = %run.team_run_id,
            run_version = run.run_version,
            members = run.bindings.len(),
            superseded = ?previous,
            "Run bindings registered"
        );
        runs.insert(run.team_run_id.clone(), run);
        Ok(previous)
    }

    /// Binding of `member_name` in generation `run_version` of the run.
    pub fn resolve_member(
        &self,
        team_run_id: &TeamRunId,
        run_version: u64,
        member_name: &str,
    ) -> Result<MemberBinding, BindingError> {
        let runs = self.read();
        let run = runs
            .get(team_run_id)
            .ok_or_else(|| BindingError::RunNotBound(team_run_id.clone()))?;
        if run.run_version != run_version {
            return Err(BindingError::RunVersionMismatch {
                team_run_id: team_run_id.clone(),
                bound: run.run_version,
                received: run_version,
            });
        }
        run.bindings
            .get(member_name)
            .cloned()
            .ok_or_else(|| BindingError::MemberNotBound {
                team_run_id: team_run_id.clone(),
                member_name: member_name.to_string(),
            })
    }

    /// Remove the run if its bound generation is not newer than
    /// `run_version`. Returns the removed run.
    pub fn unregister(&self, team_run_id: &TeamRunId, run_version: u64) -> Option<BoundRun> {
        let mut runs = self.write();
        match runs.get(team_run_id) {
            Some(run) if run.run_version <= run_version => runs.remove(team_run_id),
            _ => None,
        }
    }

    pub fn get(&self, team_run_id: &TeamRunId) -> Option<BoundRun> {
        self.read().get(team_run_id).cloned()
    }

    /// All bound runs, ordered by run id.
    pub fn list(&self) -> Vec<BoundRun> {
        let mut runs: Vec<BoundRun> = self.read().values().cloned().collect();
        runs.sort_by(|a, b| a.team_run_id.cmp(&b.team_run_id));
        runs
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<TeamRunId, BoundRun>> {
        self.runs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<TeamRunId, BoundRun>> {
        self.runs.write().unwrap_or_else(PoisonError::into_inner)
    }
}

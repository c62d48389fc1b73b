//! Static team catalog.
//!
//! The host daemon's stand-in for a team store: a JSON file listing each team,
//! its definition, and the model its members run with. It answers the
//! locator's definition and runtime lookups and produces bootstrap bindings.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use teamrun_core::{
    LlmConfig, MemberBinding, TeamDefinition, TeamDefinitionId, TeamId, TeamRunRecord,
};
use tracing::info;

use crate::error::{BoxError, CatalogError};
use crate::locator::{TeamDefinitionSource, TeamRuntimeDirectory};
use crate::remote::BootstrapBindingProvider;

fn default_model() -> String {
    "echo".to_string()
}

/// One team of the catalog file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamCatalogEntry {
    pub team_id: TeamId,
    pub definition: TeamDefinition,

    #[serde(default = "default_model")]
    pub llm_model_identifier: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_config: Option<LlmConfig>,

    #[serde(default)]
    pub auto_execute_tools: bool,

    /// Defaults to the team id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
}

impl TeamCatalogEntry {
    pub fn new(team_id: impl Into<TeamId>, definition: TeamDefinition) -> Self {
        Self {
            team_id: team_id.into(),
            definition,
            llm_model_identifier: default_model(),
            llm_config: None,
            auto_execute_tools: false,
            workspace_id: None,
        }
    }

    fn binding(&self, record: &TeamRunRecord, member_name: &str) -> Option<MemberBinding> {
        let member = self.definition.member(member_name)?;
        Some(MemberBinding {
            member_name: member.member_name.clone(),
            member_route_key: format!("{}/{}", self.team_id, member.member_name),
            member_agent_id: format!("{}:{}", record.team_run_id, member.member_name),
            agent_definition_id: member.reference_id.clone(),
            llm_model_identifier: self.llm_model_identifier.clone(),
            auto_execute_tools: self.auto_execute_tools,
            llm_config: self.llm_config.clone(),
            memory_dir: format!("memory/{}/{}", record.team_run_id, member.member_name),
            workspace_id: self
                .workspace_id
                .clone()
                .unwrap_or_else(|| self.team_id.to_string()),
        })
    }
}

/// Teams known to this host, keyed by team id.
#[derive(Debug, Default)]
pub struct StaticTeamCatalog {
    teams: BTreeMap<TeamId, TeamCatalogEntry>,
}

impl StaticTeamCatalog {
    pub fn from_entries(
        entries: impl IntoIterator<Item = TeamCatalogEntry>,
    ) -> Result<Self, CatalogError> {
        let mut teams = BTreeMap::new();
        for entry in entries {
            entry
                .definition
                .validate()
                .map_err(|source| CatalogError::InvalidDefinition {
                    team_id: entry.team_id.clone(),
                    source,
                })?;
            let team_id = entry.team_id.clone();
            if teams.insert(team_id.clone(), entry).is_some() {
                return Err(CatalogError::DuplicateTeam(team_id));
            }
        }
        Ok(Self { teams })
    }

    /// Load a JSON array of entries.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let entries: Vec<TeamCatalogEntry> = serde_json::from_str(&raw)?;
        let catalog = Self::from_entries(entries)?;
        info!(
            path = %path.as_ref().display(),
            teams = catalog.len(),
            "Loaded team catalog"
        );
        Ok(catalog)
    }

    pub fn get(&self, team_id: &TeamId) -> Option<&TeamCatalogEntry> {
        self.teams.get(team_id)
    }

    pub fn team_ids(&self) -> Vec<TeamId> {
        self.teams.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.teams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.teams.is_empty()
    }

    fn by_definition(&self, id: &TeamDefinitionId) -> Option<&TeamCatalogEntry> {
        self.teams.values().find(|entry| &entry.definition.id == id)
    }
}

#[async_trait]
impl TeamDefinitionSource for StaticTeamCatalog {
    async fn get_team_definition(
        &self,
        id: &TeamDefinitionId,
    ) -> Result<Option<TeamDefinition>, BoxError> {
        Ok(self.by_definition(id).map(|entry| entry.definition.clone()))
    }
}

#[async_trait]
impl TeamRuntimeDirectory for StaticTeamCatalog {
    async fn team_exists(&self, team_id: &TeamId) -> bool {
        self.teams.contains_key(team_id)
    }

    async fn team_member_names(&self, team_id: &TeamId) -> Vec<String> {
        self.get(team_id)
            .map(|entry| entry.definition.member_names().map(str::to_string).collect())
            .unwrap_or_default()
    }

    async fn team_definition_id(&self, team_id: &TeamId) -> Option<TeamDefinitionId> {
        self.get(team_id).map(|entry| entry.definition.id.clone())
    }
}

#[async_trait]
impl BootstrapBindingProvider for StaticTeamCatalog {
    async fn member_bindings(
        &self,
        record: &TeamRunRecord,
        member_names: &[String],
    ) -> Result<Vec<MemberBinding>, BoxError> {
        let entry = self
            .by_definition(&record.team_definition_id)
            .ok_or_else(|| format!("no team uses definition '{}'", record.team_definition_id))?;
        member_names
            .iter()
            .map(|name| {
                entry.binding(record, name).ok_or_else(|| {
                    BoxError::from(format!("member '{}' is not in the definition", name))
                })
            })
            .collect()
    }

    fn runtime_team_id(&self, record: &TeamRunRecord) -> Option<String> {
        self.by_definition(&record.team_definition_id)
            .map(|entry| entry.team_id.to_string())
    }
}

//! Known nodes and their reachability.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use teamrun_core::{NodeId, PlacementCandidateNode};
use tracing::{debug, info};

use crate::error::BridgeError;

/// One row of the node directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDirectoryEntry {
    pub node_id: NodeId,
    pub base_url: String,
    #[serde(default = "default_true")]
    pub is_healthy: bool,
    #[serde(default = "default_true")]
    pub supports_agent_execution: bool,
}

fn default_true() -> bool {
    true
}

impl NodeDirectoryEntry {
    pub fn new(node_id: impl Into<NodeId>, base_url: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            is_healthy: true,
            supports_agent_execution: true,
        }
    }
}

/// Table of nodes keyed by id.
///
/// Populated from configuration and refreshed by whatever discovery the
/// deployment uses. Reads never block on I/O.
#[derive(Debug, Default)]
pub struct NodeDirectory {
    entries: RwLock<BTreeMap<NodeId, NodeDirectoryEntry>>,
}

impl NodeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = NodeDirectoryEntry>) -> Self {
        let directory = Self::new();
        directory.replace_all(entries);
        directory
    }

    /// Load a JSON array of entries.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let entries: Vec<NodeDirectoryEntry> = serde_json::from_str(&raw)?;
        info!(
            path = %path.as_ref().display(),
            nodes = entries.len(),
            "Loaded node directory"
        );
        Ok(Self::from_entries(entries))
    }

    pub fn get(&self, node_id: &NodeId) -> Option<NodeDirectoryEntry> {
        self.read().get(node_id).cloned()
    }

    /// Base URL of `node_id`, without a trailing slash.
    pub fn resolve_base_url(&self, node_id: &NodeId) -> Result<String, BridgeError> {
        self.read()
            .get(node_id)
            .map(|e| e.base_url.clone())
            .ok_or_else(|| BridgeError::UnknownNode(node_id.clone()))
    }

    pub fn upsert(&self, mut entry: NodeDirectoryEntry) {
        entry.base_url = entry.base_url.trim_end_matches('/').to_string();
        debug!(node_id = %entry.node_id, base_url = %entry.base_url, "Upserting node");
        self.write().insert(entry.node_id.clone(), entry);
    }

    /// Replace the whole table.
    pub fn replace_all(&self, entries: impl IntoIterator<Item = NodeDirectoryEntry>) {
        let fresh: BTreeMap<NodeId, NodeDirectoryEntry> = entries
            .into_iter()
            .map(|mut e| {
                e.base_url = e.base_url.trim_end_matches('/').to_string();
                (e.node_id.clone(), e)
            })
            .collect();
        *self.write() = fresh;
    }

    /// Returns false when the node is unknown.
    pub fn mark_health(&self, node_id: &NodeId, is_healthy: bool) -> bool {
        match self.write().get_mut(node_id) {
            Some(entry) => {
                if entry.is_healthy != is_healthy {
                    info!(node_id = %node_id, is_healthy, "Node health changed");
                }
                entry.is_healthy = is_healthy;
                true
            }
            None => false,
        }
    }

    /// Candidate nodes for placement: those that can execute agents.
    pub fn placement_snapshot(&self) -> Vec<PlacementCandidateNode> {
        self.read()
            .values()
            .filter(|e| e.supports_agent_execution)
            .map(|e| PlacementCandidateNode::new(e.node_id.clone(), e.is_healthy))
            .collect()
    }

    pub fn entries(&self) -> Vec<NodeDirectoryEntry> {
        self.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<NodeId, NodeDirectoryEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<NodeId, NodeDirectoryEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

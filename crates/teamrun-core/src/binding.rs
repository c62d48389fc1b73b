//! Worker-side member bindings shipped with `RUN_BOOTSTRAP`.

use serde::{Deserialize, Serialize};

/// Provider-specific model settings, passed through untouched.
pub type LlmConfig = serde_json::Map<String, serde_json::Value>;

/// Everything a worker needs to execute one member of a run locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberBinding {
    pub member_name: String,

    /// Stable route key the host uses to address the member.
    pub member_route_key: String,

    /// Agent id the member runs under for this run.
    pub member_agent_id: String,

    pub agent_definition_id: String,

    pub llm_model_identifier: String,

    /// Whether tool invocations run without waiting for approval.
    pub auto_execute_tools: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_config: Option<LlmConfig>,

    pub memory_dir: String,

    pub workspace_id: String,
}

//! Worker observability endpoints.
//!
//! - Health check (`/health`)
//! - Bound runs (`/v1/bindings`)

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::binding_registry::RunScopedTeamBindingRegistry;

/// Summary of one bound run.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BoundRunResponse {
    team_run_id: String,
    run_version: u64,
    team_definition_id: String,
    host_node_id: String,
    members: Vec<String>,
    bound_at: String,
}

pub(crate) fn create_router(registry: Arc<RunScopedTeamBindingRegistry>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/v1/bindings", get(list_bindings))
        .layer(TraceLayer::new_for_http())
        .with_state(registry)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn list_bindings(
    State(registry): State<Arc<RunScopedTeamBindingRegistry>>,
) -> impl IntoResponse {
    let runs: Vec<BoundRunResponse> = registry
        .list()
        .into_iter()
        .map(|run| BoundRunResponse {
            team_run_id: run.team_run_id.into_inner(),
            run_version: run.run_version,
            team_definition_id: run.team_definition_id.into_inner(),
            host_node_id: run.host_node_id.into_inner(),
            members: run.bindings.into_keys().collect(),
            bound_at: run.bound_at.to_rfc3339(),
        })
        .collect();
    Json(runs)
}

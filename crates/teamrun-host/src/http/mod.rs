//! Host operator endpoints.
//!
//! - Health check (`/health`) and Prometheus metrics (`/metrics`)
//! - Run registry (`/v1/runs`, `/v1/runs/:run_id`, `/v1/runs/:run_id/stop`)
//! - Team ingress (`/v1/teams/:team_id/messages`, `/v1/teams/:team_id/tool-approvals`)
//! - Team event stream (`/v1/teams/:team_id/events`, SSE)
//! - Node directory (`/v1/nodes`)

mod stream;

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use teamrun_bridge::{ErrorBody, NodeDirectory};
use teamrun_core::{
    DispatchError, DispatchErrorCode, TeamId, TeamRunId, TeamRunRecord, ToolApprovalCommand,
    UserMessage, UserMessageCommand,
};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::LocatorError;
use crate::events::{RemoteEventRebroadcastService, TeamEventBus};
use crate::locator::TeamRunLocator;
use crate::metrics::render_metrics;
use crate::orchestrator::TeamRunOrchestrator;

/// Shared state of the operator routes.
#[derive(Clone)]
pub(crate) struct ApiState {
    pub orchestrator: Arc<TeamRunOrchestrator>,
    pub locator: Arc<TeamRunLocator>,
    pub rebroadcast: Arc<RemoteEventRebroadcastService>,
    pub bus: Arc<TeamEventBus>,
    pub directory: Arc<NodeDirectory>,
}

pub(crate) fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/v1/runs", get(list_runs))
        .route("/v1/runs/:run_id", get(get_run))
        .route("/v1/runs/:run_id/stop", post(stop_run))
        .route("/v1/teams/:team_id/run", post(ensure_run))
        .route("/v1/teams/:team_id/messages", post(post_message))
        .route("/v1/teams/:team_id/tool-approvals", post(post_tool_approval))
        .route("/v1/teams/:team_id/events", get(stream::team_events))
        .route("/v1/nodes", get(list_nodes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Request / response types
// ============================================================================

/// Body of `POST /v1/teams/:team_id/messages`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostMessageRequest {
    /// Defaults to the run's coordinator.
    #[serde(default)]
    target_member_name: Option<String>,
    content: String,
    #[serde(default)]
    context_file_paths: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DispatchAccepted {
    accepted: bool,
    team_run_id: TeamRunId,
    run_version: u64,
}

impl DispatchAccepted {
    fn for_run(record: &TeamRunRecord) -> Self {
        Self {
            accepted: true,
            team_run_id: record.team_run_id.clone(),
            run_version: record.run_version,
        }
    }
}

/// Error of an operator route, rendered as [`ErrorBody`].
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody::new(self.code, self.message))).into_response()
    }
}

impl From<LocatorError> for ApiError {
    fn from(error: LocatorError) -> Self {
        let status = match error.code() {
            "TEAM_NOT_FOUND" | "TEAM_DEFINITION_NOT_FOUND" => StatusCode::NOT_FOUND,
            "TEAM_DEFINITION_MEMBER_MISMATCH" | "INVALID_RUN_VERSION" => StatusCode::CONFLICT,
            "INVALID_TEAM_DEFINITION" => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self {
            status,
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(error: DispatchError) -> Self {
        let status = match error.code {
            DispatchErrorCode::TargetMemberNotPlaced => StatusCode::UNPROCESSABLE_ENTITY,
            DispatchErrorCode::RunNotFound => StatusCode::NOT_FOUND,
            DispatchErrorCode::RunAutoStopped => StatusCode::CONFLICT,
            DispatchErrorCode::DispatchFailed => StatusCode::BAD_GATEWAY,
        };
        Self {
            status,
            code: error.code.as_str().to_string(),
            message: error.message,
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let runs = state.orchestrator.list_run_records().await;
    let healthy = state.directory.entries().iter().filter(|e| e.is_healthy).count();
    let body = render_metrics(&runs, state.rebroadcast.stats(), healthy);
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

async fn list_runs(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.orchestrator.list_run_records().await)
}

async fn get_run(
    State(state): State<ApiState>,
    Path(run_id): Path<String>,
) -> Result<Json<TeamRunRecord>, ApiError> {
    let run_id = TeamRunId::new(run_id);
    state
        .locator
        .resolve_by_team_run_id(&run_id)
        .await
        .map(Json)
        .ok_or_else(|| {
            ApiError::from(DispatchError::new(
                DispatchErrorCode::RunNotFound,
                format!("run '{}' is not active", run_id),
            ))
        })
}

async fn stop_run(
    State(state): State<ApiState>,
    Path(run_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let run_id = TeamRunId::new(run_id);
    state.orchestrator.dispatch_control_stop(&run_id).await?;
    info!(team_run_id = %run_id, "Run stopped by operator");
    Ok(StatusCode::NO_CONTENT)
}

async fn ensure_run(
    State(state): State<ApiState>,
    Path(team_id): Path<String>,
) -> Result<Json<TeamRunRecord>, ApiError> {
    let record = state.locator.resolve_or_create_run(&TeamId::new(team_id)).await?;
    Ok(Json(record))
}

async fn post_message(
    State(state): State<ApiState>,
    Path(team_id): Path<String>,
    Json(req): Json<PostMessageRequest>,
) -> Result<(StatusCode, Json<DispatchAccepted>), ApiError> {
    let team_id = TeamId::new(team_id);
    let record = state.locator.resolve_or_create_run(&team_id).await?;
    let command = UserMessageCommand {
        target_member_name: req
            .target_member_name
            .unwrap_or_else(|| record.coordinator_member_name.clone()),
        user_message: UserMessage {
            content: req.content,
            context_file_paths: req.context_file_paths,
        },
    };

    if let Err(e) = state
        .orchestrator
        .dispatch_user_message(&record.team_run_id, &command)
        .await
    {
        warn!(
            team_id = %team_id,
            team_run_id = %record.team_run_id,
            member = %command.target_member_name,
            error = %e,
            "User message dispatch failed"
        );
        return Err(e.into());
    }
    Ok((StatusCode::ACCEPTED, Json(DispatchAccepted::for_run(&record))))
}

async fn post_tool_approval(
    State(state): State<ApiState>,
    Path(team_id): Path<String>,
    Json(command): Json<ToolApprovalCommand>,
) -> Result<(StatusCode, Json<DispatchAccepted>), ApiError> {
    let team_id = TeamId::new(team_id);
    let record = state.locator.resolve_active_run(&team_id).await.ok_or_else(|| {
        ApiError::from(DispatchError::new(
            DispatchErrorCode::RunNotFound,
            format!("team '{}' has no active run", team_id),
        ))
    })?;

    state
        .orchestrator
        .dispatch_tool_approval(&record.team_run_id, &command)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(DispatchAccepted::for_run(&record))))
}

async fn list_nodes(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.directory.entries())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::events::TeamEventAggregator;
    use crate::locator::tests::locator;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use teamrun_bridge::NodeDirectoryEntry;
    use tower::ServiceExt;

    pub(crate) fn state() -> ApiState {
        let locator = Arc::new(locator());
        let bus = Arc::new(TeamEventBus::new(16));
        ApiState {
            orchestrator: locator.orchestrator().clone(),
            rebroadcast: Arc::new(RemoteEventRebroadcastService::new(
                locator.clone(),
                Arc::new(TeamEventAggregator::new()),
                bus.clone(),
            )),
            locator,
            bus,
            directory: Arc::new(NodeDirectory::from_entries([NodeDirectoryEntry::new(
                "node-b",
                "http://node-b:7101",
            )])),
        }
    }

    async fn call(
        app: Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Vec<u8>) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        let request = match body {
            Some(body) => request.body(Body::from(body.to_string())).unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes.to_vec())
    }

    fn json_of(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call(create_router(state()), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_of(&body)["status"], "ok");
    }

    #[tokio::test]
    async fn test_message_starts_run_and_lists_it() {
        let app = create_router(state());

        let (status, body) = call(
            app.clone(),
            "POST",
            "/v1/teams/team-1/messages",
            Some(json!({ "content": "hello" })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let accepted = json_of(&body);
        assert_eq!(accepted["runVersion"], 1);
        let run_id = accepted["teamRunId"].as_str().unwrap().to_string();

        let (_, body) = call(app.clone(), "GET", "/v1/runs", None).await;
        let runs = json_of(&body);
        assert_eq!(runs.as_array().unwrap().len(), 1);
        assert_eq!(runs[0]["teamRunId"], run_id.as_str());
        assert_eq!(runs[0]["status"], "active");

        let (status, body) = call(app, "GET", &format!("/v1/runs/{}", run_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_of(&body)["placementByMember"]["writer"]["nodeId"], "node-b");
    }

    #[tokio::test]
    async fn test_unknown_team_is_not_found() {
        let (status, body) = call(
            create_router(state()),
            "POST",
            "/v1/teams/team-x/messages",
            Some(json!({ "content": "hello" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json_of(&body)["code"], "TEAM_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_stop_then_stop_again() {
        let state = state();
        let record = state
            .locator
            .resolve_or_create_run(&TeamId::new("team-1"))
            .await
            .unwrap();
        let app = create_router(state);
        let uri = format!("/v1/runs/{}/stop", record.team_run_id);

        let (status, _) = call(app.clone(), "POST", &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = call(app, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json_of(&body)["code"], "RUN_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_tool_approval_requires_active_run() {
        let (status, body) = call(
            create_router(state()),
            "POST",
            "/v1/teams/team-1/tool-approvals",
            Some(json!({ "agentName": "writer", "toolInvocationId": "t-1", "isApproved": true })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json_of(&body)["code"], "RUN_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_metrics_and_nodes() {
        let app = create_router(state());
        let (status, body) = call(app.clone(), "GET", "/metrics", None).await;
        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("teamrun_runs{status=\"active\"} 0"));
        assert!(text.contains("teamrun_nodes_healthy 1"));

        let (_, body) = call(app, "GET", "/v1/nodes", None).await;
        assert_eq!(json_of(&body)[0]["nodeId"], "node-b");
    }
}

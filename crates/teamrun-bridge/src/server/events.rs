//! Event route (host side).

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use teamrun_core::RemoteMemberEvent;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use super::{authenticate, error_response, RemoteEventSink, EVENTS_PATH};
use crate::auth::InternalEnvelopeAuthenticator;
use crate::responses::EventAccepted;

/// Rejection codes answered with 409: the event belongs to a run this host
/// no longer serves.
const CONFLICT_CODES: [&str; 2] = ["RUN_NOT_FOUND", "INVALID_RUN_VERSION"];

#[derive(Clone)]
struct EventRouteState {
    authenticator: Arc<InternalEnvelopeAuthenticator>,
    sink: Arc<dyn RemoteEventSink>,
}

/// Router serving the event path.
pub fn event_router(
    authenticator: Arc<InternalEnvelopeAuthenticator>,
    sink: Arc<dyn RemoteEventSink>,
) -> Router {
    Router::new()
        .route(EVENTS_PATH, post(receive_event))
        .layer(TraceLayer::new_for_http())
        .with_state(EventRouteState {
            authenticator,
            sink,
        })
}

async fn receive_event(
    State(state): State<EventRouteState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (source, value) = match authenticate(&state.authenticator, &headers, &body) {
        Ok(verified) => verified,
        Err(response) => return response,
    };

    let event: RemoteMemberEvent = match serde_json::from_value(value) {
        Ok(event) => event,
        Err(e) => {
            warn!(source_node = %source, error = %e, "Malformed member event");
            return error_response(StatusCode::BAD_REQUEST, "INVALID_EVENT", e.to_string());
        }
    };
    if event.source_node_id != source {
        return error_response(
            StatusCode::BAD_REQUEST,
            "SOURCE_NODE_MISMATCH",
            format!(
                "event claims source '{}' but request is signed by '{}'",
                event.source_node_id, source
            ),
        );
    }

    debug!(
        source_node = %source,
        team_run_id = %event.team_run_id,
        event_type = %event.event_type,
        "Member event received"
    );

    match state.sink.accept_event(source, event).await {
        Ok(sequence) => (
            StatusCode::ACCEPTED,
            Json(EventAccepted {
                accepted: true,
                sequence,
            }),
        )
            .into_response(),
        Err(rejection) => {
            let status = if CONFLICT_CODES.contains(&rejection.code.as_str()) {
                StatusCode::CONFLICT
            } else {
                StatusCode::UNPROCESSABLE_ENTITY
            };
            warn!(code = %rejection.code, message = %rejection.message, "Member event refused");
            error_response(status, rejection.code, rejection.message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthConfig, AuthMode};
    use crate::responses::ErrorBody;
    use crate::server::CommandRejection;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU64, Ordering};
    use teamrun_core::NodeId;
    use tower::ServiceExt;

    #[derive(Default)]
    struct CountingSink {
        next: AtomicU64,
    }

    #[async_trait]
    impl RemoteEventSink for CountingSink {
        async fn accept_event(
            &self,
            _source_node_id: NodeId,
            event: RemoteMemberEvent,
        ) -> Result<u64, CommandRejection> {
            if event.team_run_id.as_str() != "run-1" {
                return Err(CommandRejection::new("RUN_NOT_FOUND", "unknown run"));
            }
            Ok(self.next.fetch_add(1, Ordering::SeqCst) + 1)
        }
    }

    fn trusted(node: &str) -> Arc<InternalEnvelopeAuthenticator> {
        Arc::new(InternalEnvelopeAuthenticator::new(
            AuthConfig::new(node, AuthMode::TrustedLan).with_allowed_source_nodes(["node-b"]),
        ))
    }

    fn event(run: &str, source: &str) -> Value {
        json!({
            "teamRunId": run,
            "runVersion": 1,
            "sourceNodeId": source,
            "sourceEventId": "evt-1",
            "eventType": "ASSISTANT_CHUNK",
            "memberName": "writer",
            "agentId": "agent-w",
            "payload": { "text": "hi" }
        })
    }

    fn request(signer: &InternalEnvelopeAuthenticator, body: &Value) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri(EVENTS_PATH);
        for (name, value) in signer.sign(body).pairs() {
            builder = builder.header(name, value);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_event_is_sequenced() {
        let sink = Arc::new(CountingSink::default());
        let app = event_router(trusted("node-a"), sink);

        let (status, body) = send(
            app.clone(),
            request(&trusted("node-b"), &event("run-1", "node-b")),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body, json!({ "accepted": true, "sequence": 1 }));

        let (_, body) = send(app, request(&trusted("node-b"), &event("run-1", "node-b"))).await;
        assert_eq!(body["sequence"], 2);
    }

    #[tokio::test]
    async fn test_unknown_run_is_conflict() {
        let app = event_router(trusted("node-a"), Arc::new(CountingSink::default()));
        let (status, body) =
            send(app, request(&trusted("node-b"), &event("run-9", "node-b"))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let error: ErrorBody = serde_json::from_value(body).unwrap();
        assert_eq!(error.code, "RUN_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_disallowed_source_is_unauthorized() {
        let app = event_router(trusted("node-a"), Arc::new(CountingSink::default()));
        let (status, body) =
            send(app, request(&trusted("node-x"), &event("run-1", "node-x"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "SOURCE_NODE_NOT_ALLOWED");
    }

    #[tokio::test]
    async fn test_spoofed_source_is_rejected() {
        let app = event_router(trusted("node-a"), Arc::new(CountingSink::default()));
        let (status, body) =
            send(app, request(&trusted("node-b"), &event("run-1", "node-c"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "SOURCE_NODE_MISMATCH");
    }
}

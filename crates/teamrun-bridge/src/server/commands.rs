//! Command route (worker side).

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use teamrun_core::Envelope;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use super::{authenticate, error_response, CommandHandler, COMMANDS_PATH};
use crate::auth::InternalEnvelopeAuthenticator;
use crate::responses::CommandAccepted;

#[derive(Clone)]
struct CommandRouteState {
    authenticator: Arc<InternalEnvelopeAuthenticator>,
    handler: Arc<dyn CommandHandler>,
}

/// Router serving the command path.
pub fn command_router(
    authenticator: Arc<InternalEnvelopeAuthenticator>,
    handler: Arc<dyn CommandHandler>,
) -> Router {
    Router::new()
        .route(COMMANDS_PATH, post(receive_command))
        .layer(TraceLayer::new_for_http())
        .with_state(CommandRouteState {
            authenticator,
            handler,
        })
}

async fn receive_command(
    State(state): State<CommandRouteState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (source, value) = match authenticate(&state.authenticator, &headers, &body) {
        Ok(verified) => verified,
        Err(response) => return response,
    };

    let envelope = match Envelope::from_json(value) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(source_node = %source, error = %e, "Malformed command envelope");
            return error_response(StatusCode::BAD_REQUEST, "INVALID_ENVELOPE", e.to_string());
        }
    };

    let envelope_id = envelope.envelope_id.clone();
    debug!(
        source_node = %source,
        team_run_id = %envelope.team_run_id,
        kind = %envelope.kind(),
        envelope_id = %envelope_id,
        "Command envelope received"
    );

    match state.handler.handle_command(source, envelope).await {
        Ok(()) => (
            StatusCode::OK,
            Json(CommandAccepted {
                accepted: true,
                envelope_id,
            }),
        )
            .into_response(),
        Err(rejection) => {
            warn!(
                envelope_id = %envelope_id,
                code = %rejection.code,
                message = %rejection.message,
                "Command refused"
            );
            error_response(StatusCode::UNPROCESSABLE_ENTITY, rejection.code, rejection.message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthConfig, AuthMode, HEADER_SIGNATURE};
    use crate::responses::ErrorBody;
    use crate::server::CommandRejection;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use teamrun_core::{EnvelopeBuilder, EnvelopeKind, NodeId, TeamRunId};
    use tower::ServiceExt;

    #[derive(Default)]
    struct RecordingHandler {
        received: Mutex<Vec<(NodeId, EnvelopeKind)>>,
        refuse: bool,
    }

    #[async_trait]
    impl CommandHandler for RecordingHandler {
        async fn handle_command(
            &self,
            source_node_id: NodeId,
            envelope: Envelope,
        ) -> Result<(), CommandRejection> {
            if self.refuse {
                return Err(CommandRejection::new("RUN_NOT_BOUND", "no binding"));
            }
            self.received
                .lock()
                .unwrap()
                .push((source_node_id, envelope.kind()));
            Ok(())
        }
    }

    fn authenticator(node: &str) -> Arc<InternalEnvelopeAuthenticator> {
        Arc::new(InternalEnvelopeAuthenticator::new(
            AuthConfig::new(node, AuthMode::StrictSigned).with_signing_secret("k1", "s3cret"),
        ))
    }

    fn signed_request(signer: &InternalEnvelopeAuthenticator, body: &Value) -> Request<Body> {
        let headers = signer.sign(body);
        let mut builder = Request::builder()
            .method("POST")
            .uri(COMMANDS_PATH)
            .header("content-type", "application/json");
        for (name, value) in headers.pairs() {
            builder = builder.header(name, value);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn stop_envelope() -> Value {
        EnvelopeBuilder::new(TeamRunId::new("run-1"), 1)
            .control_stop(None)
            .to_json()
            .unwrap()
    }

    async fn read_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_signed_envelope_is_dispatched() {
        let handler = Arc::new(RecordingHandler::default());
        let app = command_router(authenticator("node-b"), handler.clone());
        let body = stop_envelope();

        let response = app
            .oneshot(signed_request(&authenticator("node-a"), &body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let ack: CommandAccepted = serde_json::from_value(read_json(response).await).unwrap();
        assert!(ack.accepted);
        assert_eq!(ack.envelope_id.as_str(), body["envelopeId"].as_str().unwrap());
        assert_eq!(
            handler.received.lock().unwrap().as_slice(),
            &[(NodeId::new("node-a"), EnvelopeKind::ControlStop)]
        );
    }

    #[tokio::test]
    async fn test_bad_signature_is_unauthorized() {
        let handler = Arc::new(RecordingHandler::default());
        let app = command_router(authenticator("node-b"), handler.clone());
        let body = stop_envelope();

        let mut request = signed_request(&authenticator("node-a"), &body);
        request
            .headers_mut()
            .insert(HEADER_SIGNATURE, "00".repeat(32).parse().unwrap());

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let error: ErrorBody = serde_json::from_value(read_json(response).await).unwrap();
        assert_eq!(error.code, "INVALID_SIGNATURE");
        assert!(handler.received.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unauthenticated_garbage_is_unauthorized() {
        let app = command_router(authenticator("node-b"), Arc::new(RecordingHandler::default()));
        let request = Request::builder()
            .method("POST")
            .uri(COMMANDS_PATH)
            .body(Body::from("{not json"))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let error: ErrorBody = serde_json::from_value(read_json(response).await).unwrap();
        assert_eq!(error.code, "MISSING_SOURCE_NODE");
    }

    #[tokio::test]
    async fn test_known_origin_with_garbage_body_is_bad_request() {
        let app = command_router(authenticator("node-b"), Arc::new(RecordingHandler::default()));
        let mut request = signed_request(&authenticator("node-a"), &stop_envelope());
        *request.body_mut() = Body::from("{not json");

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error: ErrorBody = serde_json::from_value(read_json(response).await).unwrap();
        assert_eq!(error.code, "INVALID_JSON");
    }

    #[tokio::test]
    async fn test_malformed_envelope_is_bad_request() {
        let app = command_router(authenticator("node-b"), Arc::new(RecordingHandler::default()));
        let body = json!({ "teamRunId": "run-1", "runVersion": 1, "kind": "SELF_DESTRUCT" });

        let response = app
            .oneshot(signed_request(&authenticator("node-a"), &body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error: ErrorBody = serde_json::from_value(read_json(response).await).unwrap();
        assert_eq!(error.code, "INVALID_ENVELOPE");
    }

    #[tokio::test]
    async fn test_handler_refusal_is_unprocessable() {
        let handler = Arc::new(RecordingHandler {
            refuse: true,
            ..Default::default()
        });
        let app = command_router(authenticator("node-b"), handler);

        let response = app
            .oneshot(signed_request(&authenticator("node-a"), &stop_envelope()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let error: ErrorBody = serde_json::from_value(read_json(response).await).unwrap();
        assert_eq!(error.code, "RUN_NOT_BOUND");
    }
}

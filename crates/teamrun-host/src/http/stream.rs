//! Server-sent event stream of a team's sequenced remote events.

use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::stream::{self, Stream};
use teamrun_core::{SequencedTeamEvent, TeamId};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::ApiState;

/// `GET /v1/teams/:team_id/events`
pub(super) async fn team_events(
    State(state): State<ApiState>,
    Path(team_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let team_id = TeamId::new(team_id);
    // Subscribe before returning so nothing published afterwards is missed.
    let receiver = state.bus.subscribe(&team_id);
    debug!(team_id = %team_id, "Event stream opened");
    Sse::new(event_stream(receiver)).keep_alive(KeepAlive::default())
}

fn event_stream(
    receiver: broadcast::Receiver<SequencedTeamEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> + Send {
    stream::unfold(receiver, |mut receiver| async move {
        match receiver.recv().await {
            Ok(event) => Some((Ok(to_sse(&event)), receiver)),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "Team event stream lagged, skipping events");
                Some((
                    Ok(Event::default().comment(format!("skipped {} events", n))),
                    receiver,
                ))
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    })
}

fn to_sse(event: &SequencedTeamEvent) -> Event {
    let mut sse = Event::default();
    // Field values must not contain line breaks.
    let event_type = event.event.event_type.as_str();
    if !event_type.contains(['\n', '\r']) {
        sse = sse.event(event_type);
    }
    let id = format!("{}:{}:{}", event.team_run_id, event.event.source_node_id, event.sequence);
    if !id.contains(['\n', '\r']) {
        sse = sse.id(id);
    }
    match sse.json_data(event) {
        Ok(sse) => sse,
        Err(e) => Event::default().comment(format!("unserializable event: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::super::{create_router, tests::state};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use futures_util::StreamExt;
    use teamrun_core::{NodeId, RemoteMemberEvent, SequencedTeamEvent, TeamId, TeamRunId};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_stream_delivers_published_events() {
        let state = state();
        let bus = state.bus.clone();
        let response = create_router(state)
            .oneshot(
                Request::builder()
                    .uri("/v1/teams/team-1/events")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        bus.publish(SequencedTeamEvent {
            team_id: TeamId::new("team-1"),
            team_run_id: TeamRunId::new("run-1"),
            sequence: 4,
            received_at: Utc::now(),
            event: RemoteMemberEvent {
                team_run_id: TeamRunId::new("run-1"),
                run_version: 1,
                source_node_id: NodeId::new("node-b"),
                source_event_id: "evt-9".to_string(),
                event_type: "ASSISTANT_MESSAGE".to_string(),
                member_name: "writer".to_string(),
                agent_id: "agent-writer".to_string(),
                payload: serde_json::json!({ "content": "echo: hi" }),
            },
        });

        let mut body = response.into_body().into_data_stream();
        let frame = body.next().await.unwrap().unwrap();
        let text = String::from_utf8(frame.to_vec()).unwrap();
        assert!(text.contains("event: ASSISTANT_MESSAGE"));
        assert!(text.contains("id: run-1:node-b:4"));
        assert!(text.contains("\"sequence\":4"));
    }
}

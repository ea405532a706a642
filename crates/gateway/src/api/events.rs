//! SSE subscription endpoint with `Last-Event-ID` replay.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures_util::StreamExt;

use crate::state::AppState;

/// `GET /api/events/{thread_id}` — long-lived subscription to a thread's
/// event bus. Reconnecting clients send `Last-Event-ID`; the buffered
/// suffix replays before live events. The stream stays open across
/// turns and ends only when the client disconnects, the bus closes, or
/// the subscriber lags out (after a `dropped` marker).
pub async fn subscribe(
    State(app): State<AppState>,
    Path(thread_id): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let last_event_id = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    tracing::debug!(thread_id, ?last_event_id, "event subscription opened");
    let subscription = app.events.subscribe(&thread_id, last_event_id);

    let stream = subscription.map(|event| {
        Ok::<_, std::convert::Infallible>(
            SseEvent::default()
                .id(event.seq.to_string())
                .data(serde_json::to_string(&event).unwrap_or_default()),
        )
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new().interval(std::time::Duration::from_secs(app.events.keepalive_secs())),
    )
}

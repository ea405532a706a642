//! Chat endpoints — the primary interface for running turns.
//!
//! - `POST /api/chat` — start/continue a turn; SSE when `stream=true`,
//!   one aggregated JSON document otherwise.
//! - `POST /api/chat/cancel/{thread_id}` — idempotent cancellation.

use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use futures_util::StreamExt;

use wv_domain::event::EventKind;

use crate::runtime::turn::{self, ChatTurnRequest};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/chat
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat(State(app): State<AppState>, Json(body): Json<ChatTurnRequest>) -> Response {
    if let Err(e) = turn::validate(&app, &body) {
        return super::error_response(e);
    }

    // One graph per thread at a time.
    if let Some(thread_id) = &body.thread_id {
        if app.cancel_map.is_running(thread_id) {
            return (
                StatusCode::TOO_MANY_REQUESTS,
                Json(serde_json::json!({
                    "error": "thread is busy — a turn is already in progress"
                })),
            )
                .into_response();
        }
    }

    let streaming = body.stream;
    let prepared = match turn::prepare(&app, &body).await {
        Ok(p) => p,
        Err(e) => return super::error_response(e),
    };
    let thread_id = prepared.thread_id.clone();

    // Subscribe before spawning so the first event is never missed.
    let bus = app.events.thread(&thread_id);
    let subscription = bus.subscribe(Some(bus.latest_seq()));

    turn::spawn_turn(app.clone(), prepared);

    let guard = DisconnectGuard::new(&app, &thread_id);
    if streaming {
        sse_turn_response(&thread_id, subscription, guard)
    } else {
        aggregate_turn_response(&thread_id, subscription, guard).await
    }
}

/// Cancels the running turn if the client goes away before the turn
/// reaches a terminal event (dropped response stream = disconnect).
struct DisconnectGuard {
    cancel_map: std::sync::Arc<crate::runtime::cancel::CancelMap>,
    thread_id: String,
    finished: bool,
}

impl DisconnectGuard {
    fn new(app: &AppState, thread_id: &str) -> Self {
        Self {
            cancel_map: app.cancel_map.clone(),
            thread_id: thread_id.to_owned(),
            finished: false,
        }
    }

    fn finish(&mut self) {
        self.finished = true;
    }
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if !self.finished && self.cancel_map.cancel(&self.thread_id) {
            tracing::info!(thread_id = %self.thread_id, "client disconnected, cancelling turn");
        }
    }
}

/// Stream bus events as SSE frames until the turn's terminal event.
fn sse_turn_response(
    thread_id: &str,
    subscription: wv_events::EventStream,
    mut guard: DisconnectGuard,
) -> Response {
    let stream = async_stream::stream! {
        let mut subscription = subscription;
        while let Some(event) = subscription.next().await {
            // The turn also ends on interrupt (suspension) and on the
            // lag marker (client must reconnect).
            let terminal = event.kind.is_terminal()
                || matches!(event.kind, EventKind::Interrupt | EventKind::Dropped);
            if terminal {
                guard.finish();
            }
            let frame = SseEvent::default()
                .id(event.seq.to_string())
                .data(serde_json::to_string(&event).unwrap_or_default());
            yield Ok::<_, std::convert::Infallible>(frame);
            if terminal {
                break;
            }
        }
    };

    let mut response = Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(std::time::Duration::from_secs(15)))
        .into_response();
    if let Ok(value) = HeaderValue::from_str(thread_id) {
        response.headers_mut().insert("X-Thread-ID", value);
    }
    response
}

/// Drain the bus until the terminal event and answer with one document.
async fn aggregate_turn_response(
    thread_id: &str,
    mut subscription: wv_events::EventStream,
    mut guard: DisconnectGuard,
) -> Response {
    let mut content = String::new();
    let mut tool_calls = Vec::new();
    let mut tool_results = Vec::new();
    let mut artifacts = Vec::new();
    let mut usage = None;
    let mut errors = Vec::new();

    while let Some(event) = subscription.next().await {
        match event.kind {
            EventKind::Message => {
                if let Some(text) = event.data.get("content").and_then(|c| c.as_str()) {
                    content = text.to_string();
                }
            }
            EventKind::ToolStart => tool_calls.push(event.data),
            EventKind::ToolResult | EventKind::ToolError => tool_results.push(event.data),
            EventKind::Artifact => artifacts.push(event.data),
            EventKind::Done => {
                usage = event.data.get("usage").cloned();
                guard.finish();
                break;
            }
            EventKind::Error => {
                errors.push(event.data);
                guard.finish();
                break;
            }
            EventKind::Interrupt | EventKind::Dropped => {
                guard.finish();
                break;
            }
            _ => {}
        }
    }

    let mut response = Json(serde_json::json!({
        "thread_id": thread_id,
        "content": content,
        "tool_calls": tool_calls,
        "tool_results": tool_results,
        "artifacts": artifacts,
        "usage": usage,
        "errors": errors,
    }))
    .into_response();
    if let Ok(value) = HeaderValue::from_str(thread_id) {
        response.headers_mut().insert("X-Thread-ID", value);
    }
    response
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/chat/cancel/{thread_id}
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn cancel(
    State(app): State<AppState>,
    Path(thread_id): Path<String>,
) -> impl IntoResponse {
    let found = app.cancel_map.cancel(&thread_id);
    tracing::info!(thread_id, found, "cancel requested");
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "thread_id": thread_id, "cancelling": found })),
    )
}

//! Thread listing and checkpoint (version) management.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use wv_domain::error::Error;
use wv_graph::Snapshot;

use crate::state::AppState;

/// `GET /api/sessions` — all known threads, most recent first.
pub async fn list(State(app): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "threads": app.threads.list() }))
}

/// `GET /api/sessions/{thread_id}/versions` — stored checkpoints.
pub async fn versions(State(app): State<AppState>, Path(thread_id): Path<String>) -> Response {
    let Some(checkpointer) = &app.checkpointer else {
        return checkpointing_disabled();
    };
    match checkpointer.list(&thread_id).await {
        Ok(metas) => Json(serde_json::json!({
            "thread_id": thread_id,
            "versions": metas,
        }))
        .into_response(),
        Err(e) => super::error_response(e),
    }
}

/// `POST /api/sessions/{thread_id}/versions` — pin the current state as
/// a new version (a copy of the latest checkpoint under a fresh seq).
pub async fn save_version(State(app): State<AppState>, Path(thread_id): Path<String>) -> Response {
    let Some(checkpointer) = &app.checkpointer else {
        return checkpointing_disabled();
    };
    let latest = match checkpointer.latest(&thread_id).await {
        Ok(Some(latest)) => latest,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": "no state to version" })),
            )
                .into_response()
        }
        Err(e) => return super::error_response(e),
    };

    let (seq, snapshot) = latest;
    let new_seq = seq + 1;
    match checkpointer.put(&thread_id, new_seq, &snapshot).await {
        Ok(()) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "thread_id": thread_id, "seq": new_seq })),
        )
            .into_response(),
        Err(e) => super::error_response(e),
    }
}

/// `POST /api/sessions/{thread_id}/restore/{version_id}` — make an older
/// checkpoint the thread's latest state; the next turn continues from it.
pub async fn restore(
    State(app): State<AppState>,
    Path((thread_id, version_id)): Path<(String, u64)>,
) -> Response {
    let Some(checkpointer) = &app.checkpointer else {
        return checkpointing_disabled();
    };

    let snapshot = match checkpointer.restore(&thread_id, version_id).await {
        Ok(raw) => raw,
        Err(Error::CheckpointNotFound { .. }) => {
            return (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({
                    "error": format!("no checkpoint {version_id} for thread {thread_id}")
                })),
            )
                .into_response()
        }
        Err(e) => return super::error_response(e),
    };

    // Summarize what the caller is restoring to.
    let message_count = Snapshot::decode(&snapshot)
        .map(|s| s.state.messages.len())
        .unwrap_or(0);

    let next_seq = match checkpointer.latest(&thread_id).await {
        Ok(Some((seq, _))) => seq + 1,
        _ => 1,
    };
    match checkpointer.put(&thread_id, next_seq, &snapshot).await {
        Ok(()) => Json(serde_json::json!({
            "thread_id": thread_id,
            "restored_from": version_id,
            "seq": next_seq,
            "message_count": message_count,
        }))
        .into_response(),
        Err(e) => super::error_response(e),
    }
}

fn checkpointing_disabled() -> Response {
    (
        StatusCode::CONFLICT,
        Json(serde_json::json!({ "error": "checkpointing is disabled" })),
    )
        .into_response()
}

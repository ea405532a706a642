//! Interrupt resumption.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use wv_domain::state::ApprovalPayload;

use crate::runtime::turn;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ResumeRequest {
    pub thread_id: String,
    pub payload: ApprovalPayload,
}

/// `POST /api/interrupt/resume` — clears the pending interrupt and
/// resumes the suspended graph from its checkpoint. The caller watches
/// `/api/events/{thread_id}` for the continuation.
pub async fn resume(State(app): State<AppState>, Json(body): Json<ResumeRequest>) -> Response {
    if app.cancel_map.is_running(&body.thread_id) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({ "error": "thread is busy" })),
        )
            .into_response();
    }

    match turn::spawn_resume(app, body.thread_id.clone(), body.payload) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "thread_id": body.thread_id, "resuming": true })),
        )
            .into_response(),
        Err(e) => super::error_response(e),
    }
}

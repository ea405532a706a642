//! HTTP façade — route table and shared response helpers.

mod chat;
mod events;
mod interrupt;
mod sessions;

use axum::http::HeaderValue;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state);

    Router::new()
        .route("/api/chat", post(chat::chat))
        .route("/api/chat/cancel/:thread_id", post(chat::cancel))
        .route("/api/events/:thread_id", get(events::subscribe))
        .route("/api/interrupt/resume", post(interrupt::resume))
        .route("/api/sessions", get(sessions::list))
        .route(
            "/api/sessions/:thread_id/versions",
            get(sessions::versions).post(sessions::save_version),
        )
        .route(
            "/api/sessions/:thread_id/restore/:version_id",
            post(sessions::restore),
        )
        .route("/api/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(state: &AppState) -> CorsLayer {
    let origins = &state.config.server.cors.allowed_origins;
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    // Wildcard-port localhost patterns from config cannot be expressed as
    // exact origins; match them with a predicate instead.
    let patterns: Vec<String> = origins.clone();
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            let Ok(origin) = origin.to_str() else {
                return false;
            };
            patterns.iter().any(|p| {
                if let Some(prefix) = p.strip_suffix(":*") {
                    origin.starts_with(prefix)
                } else {
                    origin == p
                }
            })
        }))
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn health(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<serde_json::Value> {
    let init_errors: Vec<serde_json::Value> = state
        .llm
        .init_errors()
        .iter()
        .map(|e| {
            serde_json::json!({
                "provider_id": e.provider_id,
                "kind": e.kind,
                "error": e.error,
            })
        })
        .collect();

    Json(serde_json::json!({
        "status": "ok",
        "providers": state.llm.len(),
        "provider_init_errors": init_errors,
        "tools": state.tools.load().len(),
        "checkpointing": state.checkpointer.is_some(),
    }))
}

/// Shared 4xx/5xx mapping: validation errors are the caller's fault.
pub(crate) fn error_response(e: wv_domain::error::Error) -> axum::response::Response {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    let status = match e.kind() {
        "validation" => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(serde_json::json!({ "error": e.to_string(), "kind": e.kind() })),
    )
        .into_response()
}

//! HTTP surface: inbound turn triggers, the SSE stream endpoint, schedule
//! and preauth management, and the inbox.

pub mod auth;
pub mod inbound;
pub mod inbox;
pub mod preauth;
pub mod schedules;
pub mod stream;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use bh_domain::Error;
use tower_http::cors::CorsLayer;

use crate::state::AppState;

/// Map a domain error onto its HTTP rendering.
pub(crate) fn error_response(e: &Error) -> Response {
    let status = StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
}

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/v1/inbound", post(inbound::inbound))
        .route("/v1/bots/:id/stream", get(stream::bot_stream))
        .route("/v1/bots/:id/schedules", get(schedules::list).post(schedules::create))
        .route("/v1/schedules/:id", axum::routing::delete(schedules::remove))
        .route("/v1/schedules/:id/trigger", post(schedules::trigger))
        .route("/v1/bots/:id/preauth", post(preauth::issue))
        .route("/v1/bots/:id/inbox", get(inbox::list))
        .route("/v1/inbox/:id/read", post(inbox::mark_read))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_token,
        ));

    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .merge(protected)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

//! Inbox endpoints.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::state::AppState;

use super::error_response;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "d_limit")]
    pub limit: usize,
}

fn d_limit() -> usize {
    50
}

pub async fn list(
    State(state): State<AppState>,
    Path(bot_id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let items = state.inbox.list(bot_id, query.limit);
    let unread = state.inbox.unread_count(bot_id);
    Json(serde_json::json!({ "items": items, "unread": unread }))
}

pub async fn mark_read(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match state.inbox.mark_read(id) {
        Some(item) => Json(item).into_response(),
        None => error_response(&bh_domain::Error::NotFound(format!("inbox item {id}"))),
    }
}

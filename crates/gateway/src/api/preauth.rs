//! Preauth key issuance.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use chrono::Duration;
use serde::Deserialize;
use uuid::Uuid;

use crate::state::AppState;

use super::error_response;

#[derive(Debug, Deserialize)]
pub struct IssuePreauthRequest {
    pub issued_by: Uuid,
    /// Defaults to 24 hours.
    #[serde(default)]
    pub ttl_hours: Option<i64>,
}

pub async fn issue(
    State(state): State<AppState>,
    Path(bot_id): Path<Uuid>,
    Json(body): Json<IssuePreauthRequest>,
) -> impl IntoResponse {
    // Only the bot owner may mint linking keys.
    let bot = match state.bots.get(bot_id) {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };
    if bot.owner_user_id != body.issued_by {
        return error_response(&bh_domain::Error::PolicyDenied(
            "only the bot owner can issue preauth keys".into(),
        ));
    }

    let ttl = body.ttl_hours.map(Duration::hours);
    let key = state.preauth.issue(bot_id, body.issued_by, ttl);
    Json(serde_json::json!({
        "id": key.id,
        "token": key.token,
        "expires_at": key.expires_at,
    }))
    .into_response()
}

//! Schedule endpoints: CRUD plus the bearer-authenticated trigger the
//! schedule engine (or an operator) can call remotely.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json};
use bh_domain::Error;
use serde::Deserialize;
use uuid::Uuid;

use crate::runtime::schedule_runner::fire_schedule;
use crate::runtime::schedules::Schedule;
use crate::state::AppState;

use super::error_response;

#[derive(Debug, Deserialize)]
pub struct CreateScheduleRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub pattern: String,
    pub command: String,
    #[serde(default)]
    pub max_calls: Option<u32>,
    pub owner_user_id: Uuid,
}

pub async fn create(
    State(state): State<AppState>,
    Path(bot_id): Path<Uuid>,
    Json(body): Json<CreateScheduleRequest>,
) -> impl IntoResponse {
    let mut schedule = Schedule::new(bot_id, body.owner_user_id, body.name, body.pattern, body.command);
    schedule.description = body.description;
    schedule.max_calls = body.max_calls;

    match state.schedules.insert(schedule) {
        Ok(created) => Json(created).into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn list(State(state): State<AppState>, Path(bot_id): Path<Uuid>) -> impl IntoResponse {
    Json(state.schedules.for_bot(bot_id))
}

pub async fn remove(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match state.schedules.remove(id) {
        Ok(_) => Json(serde_json::json!({ "deleted": true })).into_response(),
        Err(e) => error_response(&e),
    }
}

/// `POST /v1/schedules/:id/trigger` — authenticated with the schedule
/// JWT issued at fire time.
pub async fn trigger(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let claims = match state.tokens.verify(bearer) {
        Ok(c) => c,
        Err(e) => return error_response(&e),
    };

    let schedule = match state.schedules.get(id) {
        Ok(s) => s,
        Err(e) => return error_response(&e),
    };
    if claims.user_id != schedule.owner_user_id.to_string() {
        return error_response(&Error::PolicyDenied(
            "token subject does not own this schedule".into(),
        ));
    }

    match fire_schedule(state, id).await {
        Ok(()) => Json(serde_json::json!({ "fired": true })).into_response(),
        Err(e) => error_response(&e),
    }
}

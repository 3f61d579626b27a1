//! `POST /v1/inbound` — the single entry point channel connectors post
//! normalized events to.
//!
//! The handler returns as soon as the router has accepted the turn and
//! the outbound stream is open; the reply itself travels over the
//! adapter stream and the SSE endpoint.

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use bh_channels::{Attachment, ChannelType, ConfigMap, InboundEvent};
use serde::Deserialize;

use crate::runtime::router;
use crate::state::AppState;

use super::error_response;

#[derive(Debug, Deserialize)]
pub struct InboundRequest {
    /// Channel tag: "telegram", "discord", "feishu", "cli", "web".
    pub channel: String,
    /// Platform account id of the sender.
    pub external_id: String,
    #[serde(default)]
    pub display_name: String,
    /// Adapter-shaped criteria matching a bot binding.
    #[serde(default)]
    pub user_config: ConfigMap,
    pub session_id: String,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub reply_target: Option<String>,
    #[serde(default)]
    pub preauth_token: Option<String>,
    /// Idempotency key, normally `{channel}:{message_id}`.
    #[serde(default)]
    pub event_id: Option<String>,
}

pub async fn inbound(
    State(state): State<AppState>,
    Json(body): Json<InboundRequest>,
) -> impl IntoResponse {
    let channel: ChannelType = match body.channel.parse() {
        Ok(c) => c,
        Err(e) => return error_response(&e),
    };

    let event = InboundEvent {
        channel,
        external_id: body.external_id,
        display_name: body.display_name,
        user_config: body.user_config,
        session_id: body.session_id,
        text: body.text,
        attachments: body.attachments,
        reply_target: body.reply_target,
        preauth_token: body.preauth_token,
        event_id: body.event_id,
    };

    match router::route(&state, event).await {
        Ok(outcome) => {
            // The turn runs detached; keep its event channel drained.
            let mut events = outcome.events;
            tokio::spawn(async move { while events.recv().await.is_some() {} });

            Json(serde_json::json!({
                "accepted": true,
                "turn_id": outcome.turn_id,
                "bot_id": outcome.bot_id,
                "session_id": outcome.session_id,
            }))
            .into_response()
        }
        Err(e) => error_response(&e),
    }
}

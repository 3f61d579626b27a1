//! Inbound router — normalize, authenticate, gate, and hand off to the
//! orchestrator.
//!
//! `route` returns once the turn is accepted and its outbound stream is
//! open; the turn itself runs on its own task.

use bh_channels::InboundEvent;
use bh_domain::{Error, Result};
use bh_domain::stream::StreamEvent;
use chrono::Utc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::runtime::policy;
use crate::runtime::turn::{run_turn, TurnInput};
use crate::state::AppState;

#[derive(Debug)]
pub struct RouteOutcome {
    pub turn_id: Uuid,
    pub bot_id: Uuid,
    pub session_id: String,
    /// Caller-facing copy of the turn's event stream.
    pub events: mpsc::Receiver<StreamEvent>,
}

pub async fn route(state: &AppState, event: InboundEvent) -> Result<RouteOutcome> {
    // ── 0. Idempotency ──────────────────────────────────────────────
    if let Some(event_id) = &event.event_id {
        if state.dedupe.check_and_insert(event_id) {
            return Err(Error::Conflict(format!("duplicate event {event_id}")));
        }
    }

    // ── 1. Resolve the channel identity (create if absent) ──────────
    let mut identity = state.identity.resolve(
        event.channel.as_str(),
        &event.external_id,
        &event.display_name,
    );

    // ── 2. Resolve the bot from the binding table ───────────────────
    let binding = state
        .bindings
        .match_binding(&state.registry, event.channel, &event.user_config)?;
    let bot = state.bots.get(binding.bot_id)?;

    // ── 3. Access policy ────────────────────────────────────────────
    let decision = policy::resolve(&bot);
    if !decision.allow_guest && identity.user_id != Some(bot.owner_user_id) {
        let token = event.preauth_token.as_deref().ok_or_else(|| {
            Error::PolicyDenied(format!(
                "bot {} does not accept guests and {} is not linked to its owner",
                bot.id, identity.external_id
            ))
        })?;
        // Consume-then-link: the key is burned atomically even if the
        // link below fails, which is what makes replay useless.
        let key = state.preauth.consume(token, Utc::now())?;
        if key.bot_id != bot.id {
            return Err(Error::PolicyDenied(
                "preauth key was issued for a different bot".into(),
            ));
        }
        identity = state.identity.link_to_user(identity.id, key.issued_by)?;
        if identity.user_id != Some(bot.owner_user_id) {
            return Err(Error::PolicyDenied(
                "preauth link does not grant access to this bot".into(),
            ));
        }
        tracing::info!(identity = %identity.id, user = %key.issued_by, "preauth consumed, identity linked");
    }

    // ── 4. Lifecycle gate ───────────────────────────────────────────
    if !bot.is_active() {
        return Err(Error::PolicyDenied(format!("bot {} is not active", bot.id)));
    }

    // ── 5. Serialize per session, then hand off ─────────────────────
    let session_key = format!("{}:{}", bot.id, event.session_id);
    let permit = state
        .session_locks
        .acquire(&session_key)
        .await
        .map_err(|e| Error::Conflict(e.to_string()))?;

    let input = TurnInput {
        bot_id: bot.id,
        session_id: event.session_id.clone(),
        channel: event.channel,
        target: binding.target.clone(),
        query: event.text,
        attachments: event.attachments,
        identity: Some(identity),
        reply_to: event.reply_target,
        auth_header: None,
        deadline: None,
    };

    let (turn_id, events) = run_turn(state.clone(), input, Some(permit)).await?;
    Ok(RouteOutcome {
        turn_id,
        bot_id: bot.id,
        session_id: event.session_id,
        events,
    })
}

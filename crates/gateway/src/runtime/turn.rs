//! Turn orchestration — the per-turn state machine.
//!
//! A turn moves `composing → invoking → streaming → finalizing` and ends
//! `done` or `failed`. Exactly one `final` or `error` event is delivered
//! before the stream closes, whatever went wrong in between.
//!
//! Entry points: [`run_turn`] (router, API), [`trigger_schedule`]
//! (schedule engine), and [`run_subagent`] (tool dispatch).

use std::sync::Arc;
use std::time::Duration;

use bh_channels::{
    BufferedStream, ChannelType, ConfigMap, HubMirror, ObservedStream, OutboundStream,
    StreamObserver, StreamOptions,
};
use bh_domain::message::{Message, Role, Usage};
use bh_domain::stream::{EventBody, StreamEvent};
use bh_domain::{Error, Result};
use bh_identity::{ChannelIdentity, ScheduleTokenIssuer};
use bh_llm::{ChatMessage, ChatRequest, LlmEvent, ToolCall};
use chrono::Utc;
use futures_util::StreamExt;
use tokio::sync::{mpsc, OwnedSemaphorePermit};
use tracing::Instrument;
use uuid::Uuid;

use crate::runtime::cancel::CancelToken;
use crate::runtime::prompt;
use crate::runtime::schedules::TriggerPayload;
use crate::runtime::tools;
use crate::state::AppState;

/// Hard stop for runaway tool loops.
const MAX_TOOL_LOOPS: usize = 16;

/// Buffer for the caller-facing event channel.
const TURN_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Composing,
    Invoking,
    Streaming,
    Finalizing,
    Done,
    Failed,
}

fn advance(phase: &mut TurnPhase, next: TurnPhase) {
    tracing::trace!(from = ?phase, to = ?next, "turn phase");
    *phase = next;
}

/// Normalized turn envelope handed to the orchestrator.
pub struct TurnInput {
    pub bot_id: Uuid,
    pub session_id: String,
    pub channel: ChannelType,
    /// Outbound target (chat id for platforms, route key locally).
    pub target: String,
    pub query: String,
    pub attachments: Vec<bh_channels::Attachment>,
    /// Resolved sender; `None` for synthetic turns (schedules).
    pub identity: Option<ChannelIdentity>,
    pub reply_to: Option<String>,
    /// Bearer credential carried by schedule-triggered turns.
    pub auth_header: Option<String>,
    /// Per-turn deadline override; `None` uses the configured default.
    pub deadline: Option<Duration>,
}

impl TurnInput {
    pub fn session_key(&self) -> String {
        format!("{}:{}", self.bot_id, self.session_id)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_turn — accept, open stream, spawn the state machine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Accept a turn: open the outbound stream, then drive the state machine
/// on its own task. Returns once the stream is open, with the turn id and
/// the caller-facing event receiver.
pub async fn run_turn(
    state: AppState,
    input: TurnInput,
    permit: Option<OwnedSemaphorePermit>,
) -> Result<(Uuid, mpsc::Receiver<StreamEvent>)> {
    // Existence check up front; the phases re-read the bot for settings.
    state.bots.get(input.bot_id)?;
    let mut stream = open_outbound_stream(&state, &input).await?;

    let (tx, rx) = mpsc::channel::<StreamEvent>(TURN_CHANNEL_CAPACITY);
    let turn_id = Uuid::new_v4();
    let session_key = input.session_key();
    let cancel = state.cancel_map.register(&session_key);
    let deadline = input
        .deadline
        .unwrap_or_else(|| Duration::from_secs(state.config.turn.deadline_secs));

    let turn_span = tracing::info_span!(
        "turn",
        %turn_id,
        bot_id = %input.bot_id,
        session = %input.session_id,
        channel = %input.channel,
    );
    tokio::spawn(
        async move {
            // Held for the whole turn: serializes the session.
            let _permit = permit;
            tracing::debug!("turn started");

            drive_turn(&state, &input, turn_id, &mut stream, &tx, &cancel, deadline).await;

            state.cancel_map.remove(&session_key);
            if let Err(e) = stream.close().await {
                tracing::debug!(error = %e, "outbound stream close failed");
            }
        }
        .instrument(turn_span),
    );

    Ok((turn_id, rx))
}

/// Open the adapter stream for a turn and attach the hub mirror.
///
/// Local transports already publish onto the hub, so only external
/// platform streams get mirrored; otherwise every event would arrive at
/// local subscribers twice.
async fn open_outbound_stream(
    state: &AppState,
    input: &TurnInput,
) -> Result<Box<dyn OutboundStream>> {
    let descriptor = state
        .registry
        .lookup(input.channel)
        .ok_or_else(|| Error::NotFound(format!("channel type {} not registered", input.channel)))?;

    let config: ConfigMap = if descriptor.configless {
        ConfigMap::new()
    } else {
        state.bindings.get(input.bot_id, input.channel)?.config
    };

    let options = StreamOptions {
        reply_to: input.reply_to.clone(),
    };

    let inner: Box<dyn OutboundStream> = match state.registry.stream_sender(input.channel) {
        Some(stream_sender) => {
            stream_sender
                .open_stream(&config, &input.target, options)
                .await?
        }
        None => {
            let sender = state.registry.sender(input.channel).ok_or_else(|| {
                Error::NotFound(format!("channel type {} not registered", input.channel))
            })?;
            Box::new(BufferedStream::new(
                sender,
                config,
                input.target.clone(),
                options,
            ))
        }
    };

    if matches!(input.channel, ChannelType::Cli | ChannelType::Web) {
        return Ok(inner);
    }
    let mirror: Arc<dyn StreamObserver> =
        Arc::new(HubMirror::new(state.hub.clone(), input.bot_id.to_string()));
    Ok(Box::new(ObservedStream::new(inner, input.channel, vec![mirror])))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// drive_turn — deadline + terminal-event guarantees around the phases
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn drive_turn(
    state: &AppState,
    input: &TurnInput,
    turn_id: Uuid,
    stream: &mut Box<dyn OutboundStream>,
    tx: &mpsc::Sender<StreamEvent>,
    cancel: &CancelToken,
    deadline: Duration,
) {
    let result = tokio::select! {
        r = run_phases(state, input, turn_id, stream, tx, cancel) => r,
        _ = tokio::time::sleep(deadline) => {
            cancel.cancel();
            Err(Error::Transient(format!(
                "turn deadline exceeded after {}s",
                deadline.as_secs()
            )))
        }
    };

    if let Err(e) = result {
        tracing::warn!(%turn_id, error = %e, "turn failed");
        persist_failed_turn(state, input, &e);
        emit(stream, tx, StreamEvent::error(e.to_string())).await;
    }
}

/// Push to the adapter stream and the caller channel. Push failures are
/// logged and dropped; a broken platform stream must not abort the turn.
async fn emit(
    stream: &mut Box<dyn OutboundStream>,
    tx: &mpsc::Sender<StreamEvent>,
    event: StreamEvent,
) {
    if let Err(e) = stream.push(event.clone()).await {
        tracing::debug!(error = %e, "outbound stream push failed");
    }
    let _ = tx.send(event).await;
}

/// Persist the failure marker: the user turn plus an assistant row
/// carrying the error, so history shows the exchange happened.
fn persist_failed_turn(state: &AppState, input: &TurnInput, error: &Error) {
    let user = Message::text(input.bot_id, &input.session_id, Role::User, &input.query);
    let assistant = Message::text(
        input.bot_id,
        &input.session_id,
        Role::Assistant,
        format!("Error: {error}"),
    )
    .with_metadata("error", serde_json::json!(error.to_string()));
    state.messages.append_turn(user, assistant);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_phases — composing → invoking → streaming → finalizing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum StreamOutcome {
    Finished,
    Cancelled,
    Failed(Error),
}

async fn run_phases(
    state: &AppState,
    input: &TurnInput,
    turn_id: Uuid,
    stream: &mut Box<dyn OutboundStream>,
    tx: &mpsc::Sender<StreamEvent>,
    cancel: &CancelToken,
) -> Result<()> {
    let mut phase = TurnPhase::Idle;
    advance(&mut phase, TurnPhase::Composing);
    let bot = state.bots.get(input.bot_id)?;
    let now = Utc::now();

    // ── composing ───────────────────────────────────────────────────
    let active_minutes = state.config.turn.active_context_minutes;
    let platforms = state.registry.types();
    let skills = state.bots.skills(bot.id);
    let subagent_names: Vec<String> = state
        .subagents
        .list(bot.id)
        .into_iter()
        .map(|a| a.name)
        .collect();
    let system = prompt::build_system_prompt(
        &bot,
        &platforms,
        input.channel,
        active_minutes,
        &skills,
        &subagent_names,
        now,
    );

    let sanitized = prompt::sanitize_user_query(&input.query);
    let user_prompt =
        prompt::build_user_prompt(&sanitized, input.identity.as_ref(), input.channel, now);

    let cutoff = now - chrono::Duration::minutes(active_minutes);
    let history = state.messages.recent_since(bot.id, &input.session_id, cutoff);
    let mut messages: Vec<ChatMessage> = history.iter().map(history_to_chat).collect();
    messages.push(ChatMessage::user(&user_prompt));

    let tool_defs = tools::build_tool_definitions(state, true);

    emit(stream, tx, StreamEvent::status("started")).await;
    emit(
        stream,
        tx,
        StreamEvent::new(EventBody::AgentStart { agent: bot.name.clone() }),
    )
    .await;
    emit(stream, tx, StreamEvent::new(EventBody::ProcessingStarted)).await;

    // ── invoking / streaming: the tool loop ─────────────────────────
    let mut total_usage = Usage::default();
    let mut reasoning_log: Vec<String> = Vec::new();
    let mut tool_records: Vec<serde_json::Value> = Vec::new();

    for loop_idx in 0..MAX_TOOL_LOOPS {
        advance(&mut phase, TurnPhase::Invoking);
        tracing::debug!(loop_idx, "llm call");

        let req = ChatRequest {
            system: system.clone(),
            messages: messages.clone(),
            tools: tool_defs.clone(),
            max_tokens: None,
        };
        let mut llm_stream = match state.llm.chat_stream(&req).await {
            Ok(s) => s,
            Err(e) => {
                emit(
                    stream,
                    tx,
                    StreamEvent::new(EventBody::ProcessingFailed {
                        message: e.to_string(),
                    }),
                )
                .await;
                return Err(e);
            }
        };

        advance(&mut phase, TurnPhase::Streaming);
        let mut text_buf = String::new();
        let mut pending_tool_calls: Vec<ToolCall> = Vec::new();
        let mut tc_bufs: std::collections::HashMap<String, (String, String)> =
            std::collections::HashMap::new();
        let mut turn_usage: Option<Usage> = None;

        let outcome = loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break StreamOutcome::Cancelled,
                next = llm_stream.next() => next,
            };
            match next {
                None => break StreamOutcome::Finished,
                Some(Err(e)) => break StreamOutcome::Failed(e),
                Some(Ok(event)) => match event {
                    LlmEvent::TextStart => {
                        emit(stream, tx, StreamEvent::new(EventBody::TextStart)).await;
                    }
                    LlmEvent::TextDelta { delta } => {
                        text_buf.push_str(&delta);
                        emit(stream, tx, StreamEvent::delta(delta)).await;
                    }
                    LlmEvent::TextEnd => {
                        emit(stream, tx, StreamEvent::new(EventBody::TextEnd)).await;
                    }
                    LlmEvent::ReasoningStart => {
                        emit(stream, tx, StreamEvent::new(EventBody::ReasoningStart)).await;
                    }
                    LlmEvent::ReasoningDelta { delta } => {
                        reasoning_log.push(delta.clone());
                        emit(
                            stream,
                            tx,
                            StreamEvent::new(EventBody::ReasoningDelta { delta }),
                        )
                        .await;
                    }
                    LlmEvent::ReasoningEnd => {
                        emit(stream, tx, StreamEvent::new(EventBody::ReasoningEnd)).await;
                    }
                    LlmEvent::ImageDelta { data } => {
                        emit(stream, tx, StreamEvent::new(EventBody::ImageDelta { data })).await;
                    }
                    LlmEvent::ToolCallStart { call_id, tool_name } => {
                        tc_bufs.insert(call_id, (tool_name, String::new()));
                    }
                    LlmEvent::ToolCallDelta { call_id, delta } => {
                        if let Some((_, args)) = tc_bufs.get_mut(&call_id) {
                            args.push_str(&delta);
                        }
                    }
                    LlmEvent::ToolCallEnd {
                        call_id,
                        tool_name,
                        arguments,
                    } => {
                        tc_bufs.remove(&call_id);
                        pending_tool_calls.push(ToolCall {
                            call_id,
                            tool_name,
                            arguments,
                        });
                    }
                    LlmEvent::Done { usage } => {
                        turn_usage = usage;
                    }
                },
            }
        };

        match outcome {
            StreamOutcome::Cancelled => {
                return Err(Error::Transient("turn cancelled".into()));
            }
            StreamOutcome::Failed(e) => {
                // Transient upstream failure: surface it, do not retry.
                emit(
                    stream,
                    tx,
                    StreamEvent::new(EventBody::ProcessingFailed {
                        message: e.to_string(),
                    }),
                )
                .await;
                return Err(e);
            }
            StreamOutcome::Finished => {}
        }

        // Providers that only stream start+delta still owe us the call.
        for (call_id, (tool_name, args_buf)) in tc_bufs.drain() {
            let arguments = serde_json::from_str(&args_buf).unwrap_or_else(|_| {
                tracing::warn!(call_id = %call_id, "tool arguments are not valid JSON");
                serde_json::json!({})
            });
            pending_tool_calls.push(ToolCall {
                call_id,
                tool_name,
                arguments,
            });
        }

        if let Some(usage) = &turn_usage {
            total_usage.add(usage);
        }

        // No tool calls: the text is the final answer.
        if pending_tool_calls.is_empty() {
            advance(&mut phase, TurnPhase::Finalizing);

            emit(stream, tx, StreamEvent::new(EventBody::ProcessingCompleted)).await;

            finalize_turn(
                state,
                input,
                &text_buf,
                &total_usage,
                &reasoning_log,
                &tool_records,
            );

            emit(stream, tx, StreamEvent::final_text(&text_buf)).await;
            emit(
                stream,
                tx,
                StreamEvent::new(EventBody::AgentEnd { agent: bot.name.clone() }),
            )
            .await;
            advance(&mut phase, TurnPhase::Done);
            tracing::debug!(%turn_id, "turn done");
            return Ok(());
        }

        // ── tool dispatch ───────────────────────────────────────────
        messages.push(assistant_with_tool_calls(&text_buf, &pending_tool_calls));

        for tc in &pending_tool_calls {
            if cancel.is_cancelled() {
                return Err(Error::Transient("turn cancelled".into()));
            }
            emit(
                stream,
                tx,
                StreamEvent::new(EventBody::ToolCallStart {
                    call_id: tc.call_id.clone(),
                    tool_name: tc.tool_name.clone(),
                    arguments: tc.arguments.clone(),
                }),
            )
            .await;

            let (content, is_error) = tools::dispatch_tool(
                state,
                bot.id,
                bot.owner_user_id,
                &tc.tool_name,
                &tc.arguments,
            )
            .await;

            emit(
                stream,
                tx,
                StreamEvent::new(EventBody::ToolCallEnd {
                    call_id: tc.call_id.clone(),
                    tool_name: tc.tool_name.clone(),
                    content: content.clone(),
                    is_error,
                }),
            )
            .await;

            tool_records.push(serde_json::json!({
                "call_id": tc.call_id,
                "tool_name": tc.tool_name,
                "arguments": tc.arguments,
                "content": content,
                "is_error": is_error,
            }));
            messages.push(ChatMessage::tool_result(&tc.call_id, &content));
        }
    }

    Err(Error::Transient(format!(
        "tool loop limit reached ({MAX_TOOL_LOOPS} iterations)"
    )))
}

/// Persist the finalized turn atomically: user + assistant in one append.
fn finalize_turn(
    state: &AppState,
    input: &TurnInput,
    text: &str,
    usage: &Usage,
    reasoning: &[String],
    tool_records: &[serde_json::Value],
) {
    let mut user = Message::text(input.bot_id, &input.session_id, Role::User, &input.query);
    if input.auth_header.is_some() {
        user = user.with_metadata("scheduled", serde_json::json!(true));
    }

    let mut assistant =
        Message::text(input.bot_id, &input.session_id, Role::Assistant, text)
            .with_usage(*usage);
    if !reasoning.is_empty() {
        assistant = assistant.with_metadata("reasoning", serde_json::json!(reasoning.concat()));
    }
    if !tool_records.is_empty() {
        assistant = assistant.with_metadata("tool_calls", serde_json::json!(tool_records));
    }

    state.messages.append_turn(user, assistant);
}

fn history_to_chat(message: &Message) -> ChatMessage {
    match message.role {
        Role::User => ChatMessage::user(message.text_content()),
        Role::Assistant => ChatMessage::assistant(message.text_content()),
        Role::System => ChatMessage::system(message.text_content()),
    }
}

fn assistant_with_tool_calls(text: &str, calls: &[ToolCall]) -> ChatMessage {
    let mut msg = ChatMessage::assistant(text);
    msg.tool_calls = calls.to_vec();
    msg
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Schedule trigger entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Enter the orchestrator from a schedule fire: synthetic user message
/// from the schedule template, the issued token as the auth header, no
/// inbound event involved.
pub async fn trigger_schedule(
    state: AppState,
    payload: TriggerPayload,
    token: String,
) -> Result<(Uuid, mpsc::Receiver<StreamEvent>)> {
    let input = TurnInput {
        bot_id: payload.bot_id,
        session_id: format!("sched-{}", payload.schedule_id),
        channel: ChannelType::Cli,
        target: payload.bot_id.to_string(),
        query: payload.to_user_message(),
        attachments: Vec::new(),
        identity: None,
        reply_to: None,
        auth_header: Some(ScheduleTokenIssuer::bearer(&token)),
        deadline: None,
    };

    let permit = state
        .session_locks
        .acquire(&input.session_key())
        .await
        .map_err(|e| Error::Conflict(e.to_string()))?;
    run_turn(state, input, Some(permit)).await
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Subagent invocation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run a query against a subagent's own rolling context. No outbound
/// stream is involved; the reply returns to the caller (the parent
/// turn's tool loop), and the exchange plus usage accrue on the
/// subagent.
pub async fn run_subagent(
    state: &AppState,
    bot_id: Uuid,
    owner_user_id: Uuid,
    name: &str,
    query: &str,
) -> Result<String> {
    let agent = state.subagents.get(bot_id, name)?;

    let system = format!(
        "You are {name}, a specialist subagent. {description}\n\
         Answer from your own context; the parent bot handles everything else.",
        name = agent.name,
        description = agent.description,
    );

    let user_prompt = prompt::sanitize_user_query(query);
    let mut messages = agent.context.clone();
    messages.push(ChatMessage::user(&user_prompt));

    // Subagents get the tool set minus the subagent tools.
    let tool_defs = tools::build_tool_definitions(state, false);

    let mut new_messages = vec![ChatMessage::user(&user_prompt)];
    let mut total_usage = Usage::default();

    for _ in 0..MAX_TOOL_LOOPS {
        let req = ChatRequest {
            system: system.clone(),
            messages: messages.clone(),
            tools: tool_defs.clone(),
            max_tokens: None,
        };
        let mut llm_stream = state.llm.chat_stream(&req).await?;

        let mut text_buf = String::new();
        let mut pending_tool_calls: Vec<ToolCall> = Vec::new();
        while let Some(event) = llm_stream.next().await {
            match event? {
                LlmEvent::TextDelta { delta } => text_buf.push_str(&delta),
                LlmEvent::ToolCallEnd {
                    call_id,
                    tool_name,
                    arguments,
                } => pending_tool_calls.push(ToolCall {
                    call_id,
                    tool_name,
                    arguments,
                }),
                LlmEvent::Done { usage } => {
                    if let Some(u) = usage {
                        total_usage.add(&u);
                    }
                }
                _ => {}
            }
        }

        if pending_tool_calls.is_empty() {
            new_messages.push(ChatMessage::assistant(&text_buf));
            state.subagents.append_exchange(
                bot_id,
                name,
                new_messages,
                total_usage.input_tokens as u64,
                total_usage.output_tokens as u64,
            )?;
            return Ok(text_buf);
        }

        let assistant = assistant_with_tool_calls(&text_buf, &pending_tool_calls);
        messages.push(assistant.clone());
        new_messages.push(assistant);
        for tc in &pending_tool_calls {
            // Subagents must not recurse into their siblings, even if the
            // model names a withheld tool.
            let (content, _is_error) = if tc.tool_name.starts_with("subagent_") {
                (
                    "tool error: subagent tools are unavailable inside a subagent turn".to_string(),
                    true,
                )
            } else {
                tools::dispatch_tool(state, bot_id, owner_user_id, &tc.tool_name, &tc.arguments)
                    .await
            };
            let result = ChatMessage::tool_result(&tc.call_id, &content);
            messages.push(result.clone());
            new_messages.push(result);
        }
    }

    Err(Error::Transient(format!(
        "subagent tool loop limit reached ({MAX_TOOL_LOOPS} iterations)"
    )))
}

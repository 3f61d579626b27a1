//! End-to-end scenarios: inbound routing through turn orchestration,
//! streaming, persistence, scheduling, and the cross-channel mirror,
//! driven by the scriptable mock LLM.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bh_channels::local::LocalAdapter;
use bh_channels::registry::{Registration, RegistryBuilder};
use bh_channels::telegram::TelegramAdapter;
use bh_channels::{
    ChannelType, ConfigMap, InboundEvent, OutboundMessage, OutboundStream, Sender, StreamOptions,
    StreamSender,
};
use bh_domain::bot::{Bot, BotStatus, BotType};
use bh_domain::config::Config;
use bh_domain::stream::{EventBody, StreamEvent};
use bh_domain::ErrorKind;
use bh_gateway::bootstrap::{build_app_state, BootstrapOptions};
use bh_gateway::runtime::schedules::Schedule;
use bh_gateway::runtime::{route, ScheduleRunner};
use bh_gateway::state::AppState;
use bh_llm::MockLlm;
use chrono::Utc;
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn test_state(llm: Arc<MockLlm>) -> AppState {
    let mut config = Config::default();
    config.auth.jwt_secret = "scenario-test-secret".into();
    build_app_state(
        Arc::new(config),
        BootstrapOptions {
            state_dir: None,
            llm: Some(llm),
            memory: None,
        },
    )
    .unwrap()
}

fn active_bot(state: &AppState, bot_type: BotType) -> Bot {
    let bot = state
        .bots
        .insert(Bot::new(Uuid::new_v4(), "helper", bot_type));
    state.bots.set_status(bot.id, BotStatus::Active).unwrap()
}

fn bind_cli(state: &AppState, bot: &Bot) {
    state
        .bindings
        .bind(
            &state.registry,
            bot.id,
            ChannelType::Cli,
            &serde_json::json!({}),
            &serde_json::json!({ "external_id": "local-user" }),
            &bot.id.to_string(),
        )
        .unwrap();
}

fn cli_event(bot_session: &str, text: &str) -> InboundEvent {
    let mut user_config = ConfigMap::new();
    user_config.insert("external_id".into(), serde_json::json!("local-user"));
    InboundEvent {
        channel: ChannelType::Cli,
        external_id: "local-user".into(),
        display_name: "Local User".into(),
        user_config,
        session_id: bot_session.into(),
        text: text.into(),
        attachments: Vec::new(),
        reply_target: None,
        preauth_token: None,
        event_id: None,
    }
}

async fn drain(mut rx: tokio::sync::mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(ev) = rx.recv().await {
        events.push(ev);
    }
    events
}

fn delta_text(events: &[StreamEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match &e.body {
            EventBody::TextDelta { delta } => Some(delta.as_str()),
            _ => None,
        })
        .collect()
}

fn terminal_count(events: &[StreamEvent]) -> usize {
    events.iter().filter(|e| e.is_terminal()).count()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S1 — happy-path CLI turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s1_happy_path_cli_turn() {
    let llm = Arc::new(MockLlm::new());
    llm.push_text("Hello there!");
    let state = test_state(llm);
    let bot = active_bot(&state, BotType::Public);
    bind_cli(&state, &bot);

    let outcome = route(&state, cli_event("s1", "Hello")).await.unwrap();
    let events = drain(outcome.events).await;

    // agent_start ... text_start, deltas summing to the reply, text_end, final.
    assert!(events
        .iter()
        .any(|e| matches!(e.body, EventBody::AgentStart { .. })));
    assert!(events.iter().any(|e| matches!(e.body, EventBody::TextStart)));
    assert!(events.iter().any(|e| matches!(e.body, EventBody::TextEnd)));
    assert_eq!(delta_text(&events), "Hello there!");

    let final_content = events
        .iter()
        .find_map(|e| match &e.body {
            EventBody::Final { content } => Some(content.clone()),
            _ => None,
        })
        .expect("final event");
    assert_eq!(final_content, "Hello there!");
    assert_eq!(terminal_count(&events), 1, "exactly one terminal event");

    // Persisted history grew by user + assistant.
    assert_eq!(state.messages.count(bot.id, "s1"), 2);
    let history = state.messages.history(bot.id, "s1");
    assert_eq!(history[0].text_content(), "Hello");
    assert_eq!(history[1].text_content(), "Hello there!");
    assert!(history[1].usage.is_some());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S2 — preauth link
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s2_preauth_link_consumes_once() {
    let llm = Arc::new(MockLlm::new());
    llm.push_text("linked!");
    let state = test_state(llm);

    let owner = Uuid::new_v4();
    let bot = {
        let b = state
            .bots
            .insert(Bot::new(owner, "personal", BotType::Personal));
        state.bots.set_status(b.id, BotStatus::Active).unwrap()
    };
    bind_cli(&state, &bot);

    let key = state
        .preauth
        .issue(bot.id, owner, Some(chrono::Duration::hours(1)));
    assert_eq!(key.token.len(), 8);

    // Consuming the token links the identity to the issuing user.
    let mut event = cli_event("s1", "hello");
    event.preauth_token = Some(key.token.clone());
    let outcome = route(&state, event).await.unwrap();
    drain(outcome.events).await;

    let identity = state.identity.find("cli", "local-user").unwrap();
    assert_eq!(identity.user_id, Some(owner));

    // A second consume of the same token fails.
    let err = state.preauth.consume(&key.token, Utc::now()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TokenExhausted);

    // The linked identity now passes policy without any token.
    let outcome = route(&state, cli_event("s1", "again")).await.unwrap();
    drain(outcome.events).await;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S3 — schedule fire under quota
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s3_schedule_fire_spends_quota_and_disables() {
    let llm = Arc::new(MockLlm::new());
    llm.push_text("pong");
    let state = test_state(llm);
    let bot = active_bot(&state, BotType::Public);

    let mut schedule = Schedule::new(bot.id, bot.owner_user_id, "ping", "* * * * *", "ping");
    schedule.max_calls = Some(2);
    schedule.current_calls = 1;
    let schedule = state.schedules.insert(schedule).unwrap();

    let runner = ScheduleRunner::new(2);
    let t0 = Utc::now();
    runner.tick(&state, t0).await;

    // Wait for the spawned run to finish.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let current = state.schedules.get(schedule.id).unwrap();
        if current.current_calls == 2 {
            assert!(!current.enabled, "quota spent, schedule disabled");
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "schedule run did not finish"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Next tick: disabled schedules are not due, nothing dispatches.
    runner.tick(&state, t0 + chrono::Duration::minutes(1)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(state.schedules.get(schedule.id).unwrap().current_calls, 2);

    // The result landed in the bot's inbox.
    let items = state.inbox.list(bot.id, 10);
    assert_eq!(items.len(), 1);
    assert!(items[0].content.contains("pong"));
}

#[tokio::test]
async fn schedule_fire_is_idempotent_within_a_minute() {
    let llm = Arc::new(MockLlm::new());
    llm.push_text("one");
    llm.push_text("two");
    let state = test_state(llm);
    let bot = active_bot(&state, BotType::Public);
    let schedule = state
        .schedules
        .insert(Schedule::new(bot.id, bot.owner_user_id, "p", "* * * * *", "go"))
        .unwrap();

    let runner = ScheduleRunner::new(2);
    let t0 = Utc::now();
    runner.tick(&state, t0).await;
    runner.tick(&state, t0 + chrono::Duration::seconds(10)).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if state.schedules.get(schedule.id).unwrap().current_calls >= 1 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    // Give any (wrong) second run a moment, then confirm only one fired.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(state.schedules.get(schedule.id).unwrap().current_calls, 1);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S4 — cross-channel mirror
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Stand-in for a platform adapter: accepts everything, renders nothing.
struct FakePlatformAdapter;

#[async_trait]
impl Sender for FakePlatformAdapter {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Telegram
    }
    async fn send(&self, _: &ConfigMap, _: &str, _: &OutboundMessage) -> bh_domain::Result<()> {
        Ok(())
    }
}

struct NullStream {
    closed: bool,
}

#[async_trait]
impl OutboundStream for NullStream {
    async fn push(&mut self, _event: StreamEvent) -> bh_domain::Result<()> {
        if self.closed {
            return Err(bh_domain::Error::Conflict("stream is closed".into()));
        }
        Ok(())
    }
    async fn close(&mut self) -> bh_domain::Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[async_trait]
impl StreamSender for FakePlatformAdapter {
    async fn open_stream(
        &self,
        _: &ConfigMap,
        _: &str,
        _: StreamOptions,
    ) -> bh_domain::Result<Box<dyn OutboundStream>> {
        Ok(Box::new(NullStream { closed: false }))
    }
}

/// Replace the registry with cli + a network-free telegram stand-in.
fn state_with_fake_telegram(llm: Arc<MockLlm>) -> AppState {
    let base = test_state(llm);
    let cli = Arc::new(LocalAdapter::new(ChannelType::Cli, base.hub.clone()));
    let fake = Arc::new(FakePlatformAdapter);
    let registry = RegistryBuilder::new()
        .register(Registration {
            descriptor: LocalAdapter::descriptor(ChannelType::Cli),
            sender: cli.clone(),
            stream_sender: Some(cli),
            inbound: None,
            directory: None,
        })
        .unwrap()
        .register(Registration {
            descriptor: TelegramAdapter::descriptor(),
            sender: fake.clone(),
            stream_sender: Some(fake),
            inbound: None,
            directory: None,
        })
        .unwrap()
        .build();
    AppState {
        registry: Arc::new(registry),
        ..base
    }
}

#[tokio::test]
async fn s4_telegram_turn_mirrors_to_local_subscribers() {
    let llm = Arc::new(MockLlm::new());
    llm.push_text("hi");
    let state = state_with_fake_telegram(llm);
    let bot = active_bot(&state, BotType::Public);
    state
        .bindings
        .bind(
            &state.registry,
            bot.id,
            ChannelType::Telegram,
            &serde_json::json!({ "bot_token": "123:abc" }),
            &serde_json::json!({ "user_id": "tg_42", "username": "Alice" }),
            "123",
        )
        .unwrap();

    // A CLI/web watcher on the bot's route.
    let mut watcher = state.hub.subscribe(&bot.id.to_string());

    let mut user_config = ConfigMap::new();
    user_config.insert("user_id".into(), serde_json::json!("tg_42"));
    let event = InboundEvent {
        channel: ChannelType::Telegram,
        external_id: "tg_42".into(),
        display_name: "Alice".into(),
        user_config,
        session_id: "s1".into(),
        text: "hello from telegram".into(),
        attachments: Vec::new(),
        reply_target: None,
        preauth_token: None,
        event_id: Some("telegram:msg-1".into()),
    };
    let outcome = route(&state, event).await.unwrap();
    let direct_events = drain(outcome.events).await;

    // The caller-facing copy is unstamped.
    let direct_delta = direct_events
        .iter()
        .find(|e| matches!(e.body, EventBody::TextDelta { .. }))
        .expect("delta on the direct channel");
    assert!(direct_delta.metadata.is_empty());

    // The mirrored copy carries the source channel.
    let mut mirrored_delta = None;
    while let Ok(Some(ev)) =
        tokio::time::timeout(Duration::from_secs(2), watcher.rx.recv()).await
    {
        let is_final = ev.is_terminal();
        if matches!(ev.body, EventBody::TextDelta { .. }) {
            mirrored_delta = Some(ev);
        } else if is_final {
            break;
        }
    }
    let mirrored = mirrored_delta.expect("mirrored delta");
    assert_eq!(
        mirrored.metadata["source_channel"],
        serde_json::json!("telegram")
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S5 — personal bot guest reject
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s5_personal_bot_rejects_unlinked_guest() {
    let state = test_state(Arc::new(MockLlm::new()));
    let owner = Uuid::new_v4();
    let bot = {
        let b = state
            .bots
            .insert(Bot::new(owner, "personal", BotType::Personal));
        state.bots.set_status(b.id, BotStatus::Active).unwrap()
    };
    bind_cli(&state, &bot);

    let err = route(&state, cli_event("s1", "let me in")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PolicyDenied);

    // No turn ran, nothing persisted.
    assert_eq!(state.messages.count(bot.id, "s1"), 0);
}

#[tokio::test]
async fn inactive_bot_rejects_turns() {
    let state = test_state(Arc::new(MockLlm::new()));
    let bot = state
        .bots
        .insert(Bot::new(Uuid::new_v4(), "new", BotType::Public));
    // Still `creating`.
    bind_cli(&state, &bot);

    let err = route(&state, cli_event("s1", "hi")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PolicyDenied);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S6 — LLM transient failure
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s6_llm_transient_failure_surfaces_and_persists_error() {
    let llm = Arc::new(MockLlm::new());
    llm.push_transient_failure("par", "upstream 503");
    let state = test_state(llm);
    let bot = active_bot(&state, BotType::Public);
    bind_cli(&state, &bot);

    let outcome = route(&state, cli_event("s1", "boom")).await.unwrap();
    let events = drain(outcome.events).await;

    let failed_at = events
        .iter()
        .position(|e| matches!(e.body, EventBody::ProcessingFailed { .. }))
        .expect("processing_failed event");
    let final_at = events
        .iter()
        .position(|e| matches!(e.body, EventBody::Error { .. }))
        .expect("final error event");
    assert!(failed_at < final_at, "processing_failed precedes the error final");
    assert_eq!(terminal_count(&events), 1);

    // Persisted as assistant-with-error.
    let history = state.messages.history(bot.id, "s1");
    assert_eq!(history.len(), 2);
    assert!(history[1].text_content().starts_with("Error:"));
    assert!(history[1].metadata.contains_key("error"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Invariants across turns
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn same_session_turns_persist_in_dispatch_order() {
    let llm = Arc::new(MockLlm::new());
    llm.push_text("first reply");
    llm.push_text("second reply");
    let state = test_state(llm);
    let bot = active_bot(&state, BotType::Public);
    bind_cli(&state, &bot);

    let o1 = route(&state, cli_event("s1", "first")).await.unwrap();
    drain(o1.events).await;
    let o2 = route(&state, cli_event("s1", "second")).await.unwrap();
    drain(o2.events).await;

    let history = state.messages.history(bot.id, "s1");
    let texts: Vec<String> = history.iter().map(|m| m.text_content()).collect();
    assert_eq!(texts, vec!["first", "first reply", "second", "second reply"]);
}

#[tokio::test]
async fn duplicate_event_id_is_dropped() {
    let llm = Arc::new(MockLlm::new());
    llm.push_text("once");
    let state = test_state(llm);
    let bot = active_bot(&state, BotType::Public);
    bind_cli(&state, &bot);

    let mut event = cli_event("s1", "hi");
    event.event_id = Some("cli:msg-1".into());
    let outcome = route(&state, event).await.unwrap();
    drain(outcome.events).await;

    let mut replay = cli_event("s1", "hi");
    replay.event_id = Some("cli:msg-1".into());
    let err = route(&state, replay).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(state.messages.count(bot.id, "s1"), 2);
}

#[tokio::test]
async fn tool_call_round_trip_reaches_final_answer() {
    let llm = Arc::new(MockLlm::new());
    // First completion asks for a memory search; second answers.
    llm.push_tool_call("c1", "memory_search", serde_json::json!({ "query": "greeting" }));
    llm.push_text("answered after tool");
    let state = test_state(llm);
    let bot = active_bot(&state, BotType::Public);
    bind_cli(&state, &bot);

    let outcome = route(&state, cli_event("s1", "use your memory")).await.unwrap();
    let events = drain(outcome.events).await;

    assert!(events
        .iter()
        .any(|e| matches!(&e.body, EventBody::ToolCallStart { tool_name, .. } if tool_name == "memory_search")));
    assert!(events
        .iter()
        .any(|e| matches!(&e.body, EventBody::ToolCallEnd { is_error, .. } if !is_error)));
    let final_content = events
        .iter()
        .find_map(|e| match &e.body {
            EventBody::Final { content } => Some(content.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(final_content, "answered after tool");

    // Tool records persisted on the assistant message.
    let history = state.messages.history(bot.id, "s1");
    assert!(history[1].metadata.contains_key("tool_calls"));
}

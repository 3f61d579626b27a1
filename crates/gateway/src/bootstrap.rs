//! AppState construction and background-task spawning, shared by the
//! server binary and the integration tests.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bh_channels::discord::DiscordAdapter;
use bh_channels::feishu::FeishuAdapter;
use bh_channels::local::LocalAdapter;
use bh_channels::registry::{Registration, RegistryBuilder};
use bh_channels::telegram::TelegramAdapter;
use bh_channels::{ChannelRegistry, ChannelType, RouteHub};
use bh_domain::config::Config;
use bh_identity::{IdentityStore, PreauthStore, ScheduleTokenIssuer};
use bh_llm::{LlmClient, MockLlm};
use bh_memory::{HashEmbedder, InMemoryStore, MemoryStore};

use crate::api::auth::token_hash_from_env;
use crate::runtime::bindings::BindingStore;
use crate::runtime::bots::BotStore;
use crate::runtime::cancel::CancelMap;
use crate::runtime::contacts::ContactStore;
use crate::runtime::dedupe::DedupeStore;
use crate::runtime::inbox::InboxStore;
use crate::runtime::messages::MessageStore;
use crate::runtime::schedule_runner::ScheduleRunner;
use crate::runtime::schedules::ScheduleStore;
use crate::runtime::session_lock::SessionLockMap;
use crate::runtime::subagents::SubagentStore;
use crate::state::AppState;

/// TTL for the inbound idempotency record.
const DEDUPE_TTL: Duration = Duration::from_secs(10 * 60);

/// Register every adapter exactly once. A duplicate type is a programmer
/// error and aborts startup.
pub fn build_registry(hub: Arc<RouteHub>) -> bh_domain::Result<ChannelRegistry> {
    let cli = Arc::new(LocalAdapter::new(ChannelType::Cli, hub.clone()));
    let web = Arc::new(LocalAdapter::new(ChannelType::Web, hub.clone()));
    let telegram = Arc::new(TelegramAdapter::new());
    let discord = Arc::new(DiscordAdapter::new());
    let feishu = Arc::new(FeishuAdapter::new());

    let registry = RegistryBuilder::new()
        .register(Registration {
            descriptor: LocalAdapter::descriptor(ChannelType::Cli),
            sender: cli.clone(),
            stream_sender: Some(cli),
            inbound: None,
            directory: None,
        })?
        .register(Registration {
            descriptor: LocalAdapter::descriptor(ChannelType::Web),
            sender: web.clone(),
            stream_sender: Some(web),
            inbound: None,
            directory: None,
        })?
        .register(Registration {
            descriptor: TelegramAdapter::descriptor(),
            sender: telegram.clone(),
            stream_sender: Some(telegram),
            inbound: None,
            directory: None,
        })?
        .register(Registration {
            descriptor: DiscordAdapter::descriptor(),
            sender: discord.clone(),
            stream_sender: Some(discord),
            inbound: None,
            directory: None,
        })?
        .register(Registration {
            descriptor: FeishuAdapter::descriptor(),
            sender: feishu.clone(),
            stream_sender: Some(feishu),
            inbound: None,
            directory: None,
        })?
        .build();
    Ok(registry)
}

/// Injection points for the composition root. Defaults are the local
/// in-process backends.
#[derive(Default)]
pub struct BootstrapOptions {
    /// Directory for JSONL/JSON persistence. `None` = in-memory only.
    pub state_dir: Option<PathBuf>,
    /// LLM gateway client; defaults to the scriptable mock (local mode).
    pub llm: Option<Arc<dyn LlmClient>>,
    /// Memory backend; defaults to the in-memory cosine store.
    pub memory: Option<Arc<dyn MemoryStore>>,
}

pub fn build_app_state(config: Arc<Config>, opts: BootstrapOptions) -> anyhow::Result<AppState> {
    let hub = Arc::new(RouteHub::new());
    let registry = Arc::new(build_registry(hub.clone()).context("building channel registry")?);

    let llm = opts.llm.unwrap_or_else(|| Arc::new(MockLlm::new()));
    let memory = opts
        .memory
        .unwrap_or_else(|| Arc::new(InMemoryStore::new(Arc::new(HashEmbedder))));

    let (messages, schedules, inbox) = match &opts.state_dir {
        Some(dir) => (
            MessageStore::with_persistence(dir),
            ScheduleStore::with_persistence(dir),
            InboxStore::with_persistence(dir),
        ),
        None => (
            MessageStore::in_memory(),
            ScheduleStore::in_memory(),
            InboxStore::in_memory(),
        ),
    };

    let tokens = ScheduleTokenIssuer::new(
        config.auth.jwt_secret.clone(),
        config.jwt_ttl_minutes(),
    );

    Ok(AppState {
        config,
        registry,
        hub,
        llm,
        memory,
        identity: Arc::new(IdentityStore::new()),
        preauth: Arc::new(PreauthStore::new()),
        tokens: Arc::new(tokens),
        bots: Arc::new(BotStore::new()),
        bindings: Arc::new(BindingStore::new()),
        messages: Arc::new(messages),
        schedules: Arc::new(schedules),
        inbox: Arc::new(inbox),
        subagents: Arc::new(SubagentStore::new()),
        contacts: Arc::new(ContactStore::new()),
        session_locks: Arc::new(SessionLockMap::new()),
        cancel_map: Arc::new(CancelMap::new()),
        dedupe: Arc::new(DedupeStore::new(DEDUPE_TTL)),
        web: None,
        mcp: None,
        container: None,
        storage: None,
        api_token_hash: token_hash_from_env("BOTHIVE_API_TOKEN"),
    })
}

/// Spawn the schedule ticker.
pub fn spawn_background(state: &AppState) -> tokio::task::JoinHandle<()> {
    ScheduleRunner::new(state.config.schedule.workers).spawn(state.clone())
}

//! Shared application state passed to all handlers and runtime tasks.

use std::sync::Arc;

use bh_channels::{ChannelRegistry, RouteHub};
use bh_domain::config::Config;
use bh_identity::{IdentityStore, PreauthStore, ScheduleTokenIssuer};
use bh_llm::LlmClient;
use bh_memory::{MemoryStore, StorageProvider};

use crate::runtime::bindings::BindingStore;
use crate::runtime::bots::BotStore;
use crate::runtime::cancel::CancelMap;
use crate::runtime::contacts::ContactStore;
use crate::runtime::dedupe::DedupeStore;
use crate::runtime::inbox::InboxStore;
use crate::runtime::messages::MessageStore;
use crate::runtime::schedules::ScheduleStore;
use crate::runtime::session_lock::SessionLockMap;
use crate::runtime::subagents::SubagentStore;
use crate::runtime::tools::{ContainerExec, McpTools, WebSearcher};

/// Fields are grouped by concern:
/// - **Core services** — config, channel registry, hub, LLM, memory
/// - **Identity** — channel identities, preauth keys, schedule tokens
/// - **Stores** — bots, bindings, messages, schedules, inbox, subagents,
///   contacts
/// - **Turn control** — session locks, cancel tokens, inbound dedupe
/// - **Collaborator seams** — web search, MCP, container exec
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub registry: Arc<ChannelRegistry>,
    pub hub: Arc<RouteHub>,
    pub llm: Arc<dyn LlmClient>,
    pub memory: Arc<dyn MemoryStore>,

    // ── Identity ──────────────────────────────────────────────────────
    pub identity: Arc<IdentityStore>,
    pub preauth: Arc<PreauthStore>,
    pub tokens: Arc<ScheduleTokenIssuer>,

    // ── Stores ────────────────────────────────────────────────────────
    pub bots: Arc<BotStore>,
    pub bindings: Arc<BindingStore>,
    pub messages: Arc<MessageStore>,
    pub schedules: Arc<ScheduleStore>,
    pub inbox: Arc<InboxStore>,
    pub subagents: Arc<SubagentStore>,
    pub contacts: Arc<ContactStore>,

    // ── Turn control ──────────────────────────────────────────────────
    pub session_locks: Arc<SessionLockMap>,
    pub cancel_map: Arc<CancelMap>,
    pub dedupe: Arc<DedupeStore>,

    // ── Collaborator seams ────────────────────────────────────────────
    pub web: Option<Arc<dyn WebSearcher>>,
    pub mcp: Option<Arc<dyn McpTools>>,
    pub container: Option<Arc<dyn ContainerExec>>,
    /// Media bytes live behind this provider; the runtime moves URLs.
    pub storage: Option<Arc<dyn StorageProvider>>,

    // ── Security (startup-computed) ───────────────────────────────────
    /// SHA-256 of the API bearer token. `None` = dev mode, no auth.
    pub api_token_hash: Option<Vec<u8>>,
}

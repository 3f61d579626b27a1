//! Tool definitions and dispatch.
//!
//! Tools call back into system-local services (memory, schedules,
//! contacts, subagents, skills) or cross a collaborator seam (web search,
//! MCP, container exec). Dispatch never returns `Err`: a failed tool
//! becomes a structured error result handed back to the model, and the
//! turn continues.

use async_trait::async_trait;
use bh_llm::ToolDefinition;
use bh_domain::Result;
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::runtime::schedules::Schedule;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Collaborator seams
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct WebHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Web search backend (external collaborator).
#[async_trait]
pub trait WebSearcher: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<WebHit>>;
}

/// MCP-provided tools, seen only through this contract.
#[async_trait]
pub trait McpTools: Send + Sync {
    fn definitions(&self) -> Vec<ToolDefinition>;
    async fn call(&self, name: &str, arguments: &Value) -> Result<String>;
}

/// Container engine seam. Failures surface as tool errors, never as turn
/// aborts.
#[async_trait]
pub trait ContainerExec: Send + Sync {
    async fn exec(&self, bot_id: Uuid, command: &str) -> Result<String>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Definitions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn def(name: &str, description: &str, parameters: Value) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        parameters,
    }
}

fn string_prop(desc: &str) -> Value {
    json!({ "type": "string", "description": desc })
}

/// Build the tool set for a turn. Subagent tools are withheld inside
/// subagent turns so a specialist cannot recurse into its siblings.
pub fn build_tool_definitions(state: &AppState, include_subagent_tools: bool) -> Vec<ToolDefinition> {
    let mut defs = vec![
        def(
            "web_search",
            "Search the web and return top results.",
            json!({
                "type": "object",
                "properties": {
                    "query": string_prop("search query"),
                    "limit": { "type": "integer", "description": "max results (default 5)" },
                },
                "required": ["query"],
            }),
        ),
        def(
            "memory_search",
            "Semantic search over this bot's long-term memory.",
            json!({
                "type": "object",
                "properties": {
                    "query": string_prop("what to look for"),
                    "limit": { "type": "integer", "description": "max hits (default 5)" },
                },
                "required": ["query"],
            }),
        ),
        def(
            "memory_save",
            "Save a fact into this bot's long-term memory.",
            json!({
                "type": "object",
                "properties": { "content": string_prop("the fact to remember") },
                "required": ["content"],
            }),
        ),
        def(
            "schedule_create",
            "Create a cron schedule that re-enters this bot with a command.",
            json!({
                "type": "object",
                "properties": {
                    "name": string_prop("short schedule name"),
                    "pattern": string_prop("5-field cron pattern"),
                    "command": string_prop("command to run on fire"),
                    "max_calls": { "type": "integer", "description": "optional call quota" },
                },
                "required": ["name", "pattern", "command"],
            }),
        ),
        def(
            "schedule_list",
            "List this bot's schedules.",
            json!({ "type": "object", "properties": {} }),
        ),
        def(
            "schedule_toggle",
            "Enable or disable a schedule.",
            json!({
                "type": "object",
                "properties": {
                    "schedule_id": string_prop("schedule id"),
                    "enabled": { "type": "boolean" },
                },
                "required": ["schedule_id", "enabled"],
            }),
        ),
        def(
            "schedule_delete",
            "Delete a schedule.",
            json!({
                "type": "object",
                "properties": { "schedule_id": string_prop("schedule id") },
                "required": ["schedule_id"],
            }),
        ),
        def(
            "contact_add",
            "Add a contact to this bot's address book.",
            json!({
                "type": "object",
                "properties": {
                    "name": string_prop("contact name"),
                    "channel": string_prop("channel tag (telegram, discord, ...)"),
                    "address": string_prop("platform address"),
                    "note": string_prop("optional note"),
                },
                "required": ["name", "channel", "address"],
            }),
        ),
        def(
            "contact_list",
            "List this bot's contacts.",
            json!({ "type": "object", "properties": {} }),
        ),
        def(
            "contact_remove",
            "Remove a contact by name.",
            json!({
                "type": "object",
                "properties": { "name": string_prop("contact name") },
                "required": ["name"],
            }),
        ),
        def(
            "skill_enable",
            "Enable a skill for this bot.",
            json!({
                "type": "object",
                "properties": { "skill": string_prop("skill tag") },
                "required": ["skill"],
            }),
        ),
        def(
            "skill_disable",
            "Disable a skill for this bot.",
            json!({
                "type": "object",
                "properties": { "skill": string_prop("skill tag") },
                "required": ["skill"],
            }),
        ),
    ];

    if include_subagent_tools {
        defs.extend([
            def(
                "subagent_create",
                "Create a named specialist with its own rolling context.",
                json!({
                    "type": "object",
                    "properties": {
                        "name": string_prop("subagent name"),
                        "description": string_prop("what it specializes in"),
                    },
                    "required": ["name"],
                }),
            ),
            def(
                "subagent_list",
                "List this bot's subagents.",
                json!({ "type": "object", "properties": {} }),
            ),
            def(
                "subagent_delete",
                "Delete a subagent.",
                json!({
                    "type": "object",
                    "properties": { "name": string_prop("subagent name") },
                    "required": ["name"],
                }),
            ),
            def(
                "subagent_ask",
                "Delegate a question to a subagent; it answers from its own context.",
                json!({
                    "type": "object",
                    "properties": {
                        "name": string_prop("subagent name"),
                        "query": string_prop("the question"),
                    },
                    "required": ["name", "query"],
                }),
            ),
        ]);
    }

    if state.container.is_some() {
        defs.push(def(
            "container_exec",
            "Run a command inside this bot's container.",
            json!({
                "type": "object",
                "properties": { "command": string_prop("shell command") },
                "required": ["command"],
            }),
        ));
    }

    if let Some(mcp) = &state.mcp {
        defs.extend(mcp.definitions());
    }

    defs
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn arg_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

fn require_str<'a>(args: &'a Value, key: &str) -> bh_domain::Result<&'a str> {
    arg_str(args, key)
        .ok_or_else(|| bh_domain::Error::Validation(format!("missing required argument: {key}")))
}

/// Run one tool call. Returns `(content, is_error)`; errors are data, not
/// control flow.
pub async fn dispatch_tool(
    state: &AppState,
    bot_id: Uuid,
    owner_user_id: Uuid,
    name: &str,
    args: &Value,
) -> (String, bool) {
    let result = dispatch_inner(state, bot_id, owner_user_id, name, args).await;
    match result {
        Ok(content) => (content, false),
        Err(e) => {
            tracing::warn!(tool = name, error = %e, "tool call failed");
            (format!("tool error: {e}"), true)
        }
    }
}

fn dispatch_inner<'a>(
    state: &'a AppState,
    bot_id: Uuid,
    owner_user_id: Uuid,
    name: &'a str,
    args: &'a Value,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<String>> + Send + 'a>> {
    Box::pin(async move {
    match name {
        "web_search" => {
            let query = require_str(args, "query")?;
            let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(5) as usize;
            match &state.web {
                Some(web) => {
                    let hits = web.search(query, limit).await?;
                    Ok(serde_json::to_string(&hits)?)
                }
                None => Err(bh_domain::Error::NotFound("web search is not configured".into())),
            }
        }
        "memory_search" => {
            let query = require_str(args, "query")?;
            let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(5) as usize;
            let hits = state.memory.search(bot_id, query, limit).await?;
            if hits.is_empty() {
                Ok("no matching memories".into())
            } else {
                Ok(serde_json::to_string(&hits)?)
            }
        }
        "memory_save" => {
            let content = require_str(args, "content")?;
            let id = state.memory.ingest(bot_id, content).await?;
            Ok(format!("saved memory {id}"))
        }
        "schedule_create" => {
            let name = require_str(args, "name")?;
            let pattern = require_str(args, "pattern")?;
            let command = require_str(args, "command")?;
            let mut schedule = Schedule::new(bot_id, owner_user_id, name, pattern, command);
            schedule.max_calls = args.get("max_calls").and_then(Value::as_u64).map(|n| n as u32);
            let created = state.schedules.insert(schedule)?;
            Ok(format!("created schedule {} ({})", created.id, created.pattern))
        }
        "schedule_list" => {
            let schedules = state.schedules.for_bot(bot_id);
            Ok(serde_json::to_string(&schedules)?)
        }
        "schedule_toggle" => {
            let id = parse_uuid(args, "schedule_id")?;
            let enabled = args.get("enabled").and_then(Value::as_bool).unwrap_or(false);
            let updated = state.schedules.update(id, |s| s.enabled = enabled)?;
            Ok(format!("schedule {} enabled={}", updated.id, updated.enabled))
        }
        "schedule_delete" => {
            let id = parse_uuid(args, "schedule_id")?;
            state.schedules.remove(id)?;
            Ok(format!("deleted schedule {id}"))
        }
        "contact_add" => {
            let name = require_str(args, "name")?;
            let channel = require_str(args, "channel")?;
            let address = require_str(args, "address")?;
            let note = arg_str(args, "note").unwrap_or("");
            let contact = state.contacts.add(bot_id, name, channel, address, note)?;
            Ok(format!("added contact {}", contact.name))
        }
        "contact_list" => Ok(serde_json::to_string(&state.contacts.list(bot_id))?),
        "contact_remove" => {
            let name = require_str(args, "name")?;
            state.contacts.remove(bot_id, name)?;
            Ok(format!("removed contact {name}"))
        }
        "skill_enable" => {
            let skill = require_str(args, "skill")?;
            state.bots.enable_skill(bot_id, skill);
            Ok(format!("skill {skill} enabled"))
        }
        "skill_disable" => {
            let skill = require_str(args, "skill")?;
            state.bots.disable_skill(bot_id, skill);
            Ok(format!("skill {skill} disabled"))
        }
        "subagent_create" => {
            let name = require_str(args, "name")?;
            let description = arg_str(args, "description").unwrap_or("");
            let agent = state.subagents.create(bot_id, name, description)?;
            Ok(format!("created subagent {}", agent.name))
        }
        "subagent_list" => {
            let agents: Vec<Value> = state
                .subagents
                .list(bot_id)
                .into_iter()
                .map(|a| {
                    json!({
                        "name": a.name,
                        "description": a.description,
                        "context_messages": a.context.len(),
                        "total_input_tokens": a.total_input_tokens,
                        "total_output_tokens": a.total_output_tokens,
                    })
                })
                .collect();
            Ok(serde_json::to_string(&agents)?)
        }
        "subagent_delete" => {
            let name = require_str(args, "name")?;
            state.subagents.delete(bot_id, name)?;
            Ok(format!("deleted subagent {name}"))
        }
        "subagent_ask" => {
            let name = require_str(args, "name")?;
            let query = require_str(args, "query")?;
            // Boxed as dyn to break the async type cycle:
            // dispatch → run_subagent → dispatch.
            let fut: std::pin::Pin<
                Box<dyn std::future::Future<Output = Result<String>> + Send + '_>,
            > = Box::pin(crate::runtime::turn::run_subagent(
                state,
                bot_id,
                owner_user_id,
                name,
                query,
            ));
            fut.await
        }
        "container_exec" => {
            let command = require_str(args, "command")?;
            match &state.container {
                Some(container) => container.exec(bot_id, command).await,
                None => Err(bh_domain::Error::NotFound("container runtime not configured".into())),
            }
        }
        other => {
            if let Some(mcp) = &state.mcp {
                if mcp.definitions().iter().any(|d| d.name == other) {
                    return mcp.call(other, args).await;
                }
            }
            Err(bh_domain::Error::NotFound(format!("unknown tool: {other}")))
        }
    }
    })
}

fn parse_uuid(args: &Value, key: &str) -> Result<Uuid> {
    arg_str(args, key)
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| bh_domain::Error::Validation(format!("{key} must be a uuid")))
}

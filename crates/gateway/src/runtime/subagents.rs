//! Subagents — named specialists under a parent bot, each with its own
//! rolling context and monotonically increasing usage totals.

use std::collections::HashMap;

use bh_domain::{Error, Result};
use bh_llm::ChatMessage;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subagent {
    pub id: Uuid,
    pub bot_id: Uuid,
    pub name: String,
    pub description: String,
    /// Rolling conversation context; replaced wholesale on update.
    pub context: Vec<ChatMessage>,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct SubagentStore {
    /// (bot_id, name) → subagent. Names are unique per bot.
    inner: RwLock<HashMap<(Uuid, String), Subagent>>,
}

impl SubagentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, bot_id: Uuid, name: &str, description: &str) -> Result<Subagent> {
        if name.trim().is_empty() {
            return Err(Error::Validation("subagent name is empty".into()));
        }
        let key = (bot_id, name.to_string());
        let mut inner = self.inner.write();
        if inner.contains_key(&key) {
            return Err(Error::Conflict(format!(
                "subagent {name} already exists for bot {bot_id}"
            )));
        }
        let now = Utc::now();
        let agent = Subagent {
            id: Uuid::new_v4(),
            bot_id,
            name: name.to_string(),
            description: description.to_string(),
            context: Vec::new(),
            total_input_tokens: 0,
            total_output_tokens: 0,
            created_at: now,
            updated_at: now,
        };
        inner.insert(key, agent.clone());
        Ok(agent)
    }

    pub fn get(&self, bot_id: Uuid, name: &str) -> Result<Subagent> {
        self.inner
            .read()
            .get(&(bot_id, name.to_string()))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("subagent {name}")))
    }

    pub fn list(&self, bot_id: Uuid) -> Vec<Subagent> {
        let mut agents: Vec<Subagent> = self
            .inner
            .read()
            .values()
            .filter(|a| a.bot_id == bot_id)
            .cloned()
            .collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        agents
    }

    pub fn delete(&self, bot_id: Uuid, name: &str) -> Result<()> {
        self.inner
            .write()
            .remove(&(bot_id, name.to_string()))
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("subagent {name}")))
    }

    /// Contexts are replaced wholesale, never patched in place.
    pub fn replace_context(&self, bot_id: Uuid, name: &str, context: Vec<ChatMessage>) -> Result<()> {
        let mut inner = self.inner.write();
        let agent = inner
            .get_mut(&(bot_id, name.to_string()))
            .ok_or_else(|| Error::NotFound(format!("subagent {name}")))?;
        agent.context = context;
        agent.updated_at = Utc::now();
        Ok(())
    }

    /// Append a finished exchange and accrue usage. Totals only grow.
    pub fn append_exchange(
        &self,
        bot_id: Uuid,
        name: &str,
        messages: Vec<ChatMessage>,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        let agent = inner
            .get_mut(&(bot_id, name.to_string()))
            .ok_or_else(|| Error::NotFound(format!("subagent {name}")))?;
        agent.context.extend(messages);
        agent.total_input_tokens += input_tokens;
        agent.total_output_tokens += output_tokens;
        agent.updated_at = Utc::now();
        Ok(())
    }

    /// Remove every subagent of a bot (deletion cascade).
    pub fn remove_bot(&self, bot_id: Uuid) {
        self.inner.write().retain(|(b, _), _| *b != bot_id);
    }
}

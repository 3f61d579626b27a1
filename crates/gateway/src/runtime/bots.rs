//! Bot store — lifecycle, settings, and per-bot enabled skills.

use std::collections::HashMap;

use bh_domain::bot::{Bot, BotStatus};
use bh_domain::{Error, Result};
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct BotStore {
    bots: RwLock<HashMap<Uuid, Bot>>,
    /// Skill tags enabled per bot, listed in the system prompt and toggled
    /// by the skill tool.
    skills: RwLock<HashMap<Uuid, Vec<String>>>,
}

impl BotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, bot: Bot) -> Bot {
        self.bots.write().insert(bot.id, bot.clone());
        bot
    }

    pub fn get(&self, id: Uuid) -> Result<Bot> {
        self.bots
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("bot {id}")))
    }

    pub fn list(&self) -> Vec<Bot> {
        self.bots.read().values().cloned().collect()
    }

    pub fn set_status(&self, id: Uuid, status: BotStatus) -> Result<Bot> {
        let mut bots = self.bots.write();
        let bot = bots
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("bot {id}")))?;
        bot.status = status;
        bot.updated_at = Utc::now();
        Ok(bot.clone())
    }

    pub fn update(&self, id: Uuid, f: impl FnOnce(&mut Bot)) -> Result<Bot> {
        let mut bots = self.bots.write();
        let bot = bots
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("bot {id}")))?;
        f(bot);
        bot.updated_at = Utc::now();
        Ok(bot.clone())
    }

    pub fn remove(&self, id: Uuid) -> Result<Bot> {
        self.skills.write().remove(&id);
        self.bots
            .write()
            .remove(&id)
            .ok_or_else(|| Error::NotFound(format!("bot {id}")))
    }

    // ── skills ──────────────────────────────────────────────────────

    pub fn skills(&self, bot_id: Uuid) -> Vec<String> {
        self.skills.read().get(&bot_id).cloned().unwrap_or_default()
    }

    /// Enable a skill tag. Idempotent.
    pub fn enable_skill(&self, bot_id: Uuid, skill: &str) {
        let mut skills = self.skills.write();
        let list = skills.entry(bot_id).or_default();
        if !list.iter().any(|s| s == skill) {
            list.push(skill.to_string());
        }
    }

    pub fn disable_skill(&self, bot_id: Uuid, skill: &str) {
        if let Some(list) = self.skills.write().get_mut(&bot_id) {
            list.retain(|s| s != skill);
        }
    }
}

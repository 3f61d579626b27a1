//! Message store — finalized turns, persisted as append-only JSONL.
//!
//! A turn lands as one atomic append of user + assistant rows, so
//! within a (bot, session) the persisted order is the dispatch order.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;

use bh_domain::message::Message;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

type SessionKey = (Uuid, String);

pub struct MessageStore {
    inner: RwLock<HashMap<SessionKey, Vec<Message>>>,
    persist_path: Option<PathBuf>,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl MessageStore {
    pub fn in_memory() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            persist_path: None,
        }
    }

    pub fn with_persistence(state_path: &std::path::Path) -> Self {
        let persist_path = state_path.join("messages.jsonl");
        let mut store = Self {
            inner: RwLock::new(HashMap::new()),
            persist_path: Some(persist_path),
        };
        store.load();
        store
    }

    fn load(&mut self) {
        let Some(path) = &self.persist_path else { return };
        if let Ok(data) = std::fs::read_to_string(path) {
            let mut map: HashMap<SessionKey, Vec<Message>> = HashMap::new();
            for line in data.lines() {
                if let Ok(msg) = serde_json::from_str::<Message>(line) {
                    map.entry((msg.bot_id, msg.session_id.clone()))
                        .or_default()
                        .push(msg);
                }
            }
            let count: usize = map.values().map(Vec::len).sum();
            self.inner = RwLock::new(map);
            if count > 0 {
                tracing::info!(count, "loaded messages from disk");
            }
        }
    }

    fn persist_lines(&self, messages: &[Message]) {
        let Some(path) = &self.persist_path else { return };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(mut f) = std::fs::OpenOptions::new().create(true).append(true).open(path) {
            for msg in messages {
                if let Ok(json) = serde_json::to_string(msg) {
                    let _ = writeln!(f, "{json}");
                }
            }
        }
    }

    /// Append a finalized turn: both rows under one write lock.
    pub fn append_turn(&self, user: Message, assistant: Message) {
        let key = (user.bot_id, user.session_id.clone());
        {
            let mut inner = self.inner.write();
            let list = inner.entry(key).or_default();
            list.push(user.clone());
            list.push(assistant.clone());
        }
        self.persist_lines(&[user, assistant]);
    }

    /// Append a single row (system markers).
    pub fn append(&self, message: Message) {
        let key = (message.bot_id, message.session_id.clone());
        self.inner
            .write()
            .entry(key)
            .or_default()
            .push(message.clone());
        self.persist_lines(&[message]);
    }

    /// Messages newer than `cutoff`, in persisted order.
    pub fn recent_since(
        &self,
        bot_id: Uuid,
        session_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Vec<Message> {
        self.inner
            .read()
            .get(&(bot_id, session_id.to_string()))
            .map(|msgs| {
                msgs.iter()
                    .filter(|m| m.created_at >= cutoff)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn history(&self, bot_id: Uuid, session_id: &str) -> Vec<Message> {
        self.inner
            .read()
            .get(&(bot_id, session_id.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn count(&self, bot_id: Uuid, session_id: &str) -> usize {
        self.inner
            .read()
            .get(&(bot_id, session_id.to_string()))
            .map_or(0, Vec::len)
    }
}

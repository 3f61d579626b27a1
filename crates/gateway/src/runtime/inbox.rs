//! Inbox — non-conversational events queued to a bot.
//!
//! Items are strictly additive and marking read is monotonic: `read_at`
//! is set once and never cleared. The store keeps a bounded in-memory
//! ring backed by JSONL.

use std::collections::VecDeque;
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const MAX_ITEMS: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxItem {
    pub id: Uuid,
    pub bot_id: Uuid,
    /// Where the item came from ("schedule", "system", a channel tag).
    pub source: String,
    pub content: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
}

impl InboxItem {
    pub fn new(bot_id: Uuid, source: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            bot_id,
            source: source.into(),
            content: content.into(),
            is_read: false,
            created_at: Utc::now(),
            read_at: None,
        }
    }
}

pub struct InboxStore {
    inner: RwLock<VecDeque<InboxItem>>,
    persist_path: Option<PathBuf>,
}

impl Default for InboxStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl InboxStore {
    pub fn in_memory() -> Self {
        Self {
            inner: RwLock::new(VecDeque::new()),
            persist_path: None,
        }
    }

    pub fn with_persistence(state_path: &std::path::Path) -> Self {
        let persist_path = state_path.join("inbox.jsonl");
        let mut store = Self {
            inner: RwLock::new(VecDeque::new()),
            persist_path: Some(persist_path),
        };
        store.load();
        store
    }

    fn load(&mut self) {
        let Some(path) = &self.persist_path else { return };
        if let Ok(data) = std::fs::read_to_string(path) {
            let mut items = VecDeque::new();
            for line in data.lines() {
                if let Ok(item) = serde_json::from_str::<InboxItem>(line) {
                    items.push_back(item);
                }
            }
            while items.len() > MAX_ITEMS {
                items.pop_front();
            }
            let count = items.len();
            self.inner = RwLock::new(items);
            if count > 0 {
                tracing::info!(count, "loaded inbox items from disk");
            }
        }
    }

    fn persist_one(&self, item: &InboxItem) {
        let Some(path) = &self.persist_path else { return };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(json) = serde_json::to_string(item) {
            if let Ok(mut f) = std::fs::OpenOptions::new().create(true).append(true).open(path) {
                let _ = writeln!(f, "{json}");
            }
        }
    }

    pub fn push(&self, item: InboxItem) -> InboxItem {
        {
            let mut inner = self.inner.write();
            inner.push_back(item.clone());
            while inner.len() > MAX_ITEMS {
                inner.pop_front();
            }
        }
        self.persist_one(&item);
        item
    }

    /// Most recent first.
    pub fn list(&self, bot_id: Uuid, limit: usize) -> Vec<InboxItem> {
        self.inner
            .read()
            .iter()
            .rev()
            .filter(|i| i.bot_id == bot_id)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Monotonic: the first call sets `read_at`; later calls change
    /// nothing. Returns the item as stored.
    pub fn mark_read(&self, id: Uuid) -> Option<InboxItem> {
        let mut inner = self.inner.write();
        let item = inner.iter_mut().find(|i| i.id == id)?;
        if !item.is_read {
            item.is_read = true;
            item.read_at = Some(Utc::now());
        }
        Some(item.clone())
    }

    pub fn unread_count(&self, bot_id: Uuid) -> usize {
        self.inner
            .read()
            .iter()
            .filter(|i| i.bot_id == bot_id && !i.is_read)
            .count()
    }
}

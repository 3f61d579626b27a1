//! Contacts — per-bot address book entries managed by the contact tools.

use bh_domain::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    pub bot_id: Uuid,
    pub name: String,
    /// Channel tag ("telegram", "discord", ...).
    pub channel: String,
    /// Platform address (chat id, user id).
    pub address: String,
    #[serde(default)]
    pub note: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct ContactStore {
    inner: RwLock<Vec<Contact>>,
}

impl ContactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &self,
        bot_id: Uuid,
        name: &str,
        channel: &str,
        address: &str,
        note: &str,
    ) -> Result<Contact> {
        if name.trim().is_empty() || address.trim().is_empty() {
            return Err(Error::Validation("contact needs a name and an address".into()));
        }
        let mut inner = self.inner.write();
        if inner
            .iter()
            .any(|c| c.bot_id == bot_id && c.name.eq_ignore_ascii_case(name))
        {
            return Err(Error::Conflict(format!("contact {name} already exists")));
        }
        let contact = Contact {
            id: Uuid::new_v4(),
            bot_id,
            name: name.trim().to_string(),
            channel: channel.to_string(),
            address: address.trim().to_string(),
            note: note.to_string(),
            created_at: Utc::now(),
        };
        inner.push(contact.clone());
        Ok(contact)
    }

    pub fn list(&self, bot_id: Uuid) -> Vec<Contact> {
        self.inner
            .read()
            .iter()
            .filter(|c| c.bot_id == bot_id)
            .cloned()
            .collect()
    }

    pub fn find(&self, bot_id: Uuid, name: &str) -> Result<Contact> {
        self.inner
            .read()
            .iter()
            .find(|c| c.bot_id == bot_id && c.name.eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("contact {name}")))
    }

    pub fn remove(&self, bot_id: Uuid, name: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let before = inner.len();
        inner.retain(|c| !(c.bot_id == bot_id && c.name.eq_ignore_ascii_case(name)));
        if inner.len() == before {
            return Err(Error::NotFound(format!("contact {name}")));
        }
        Ok(())
    }
}

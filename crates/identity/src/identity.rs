//! Channel identity store — one row per (channel type, external id).
//!
//! `resolve` is idempotent: the first sighting of an external id inserts a
//! row, later sightings return the same id and refresh the display name.
//! The link to a user account is append-only; rebinding an identity to a
//! different user is rejected.

use std::collections::HashMap;

use bh_domain::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelIdentity {
    pub id: Uuid,
    pub channel_type: String,
    pub external_id: String,
    pub display_name: String,
    /// Linked user account, if any. Written at most once.
    pub user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct IdentityStore {
    /// (channel_type, external_id) → identity. The tuple key is the
    /// uniqueness constraint.
    by_key: RwLock<HashMap<(String, String), ChannelIdentity>>,
}

impl IdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert-or-refresh. Returns the stable identity for this external id.
    pub fn resolve(
        &self,
        channel_type: &str,
        external_id: &str,
        display_name: &str,
    ) -> ChannelIdentity {
        let key = (channel_type.to_string(), external_id.to_string());
        let mut map = self.by_key.write();
        let now = Utc::now();
        let identity = map.entry(key).or_insert_with(|| {
            tracing::debug!(channel_type, external_id, "new channel identity");
            ChannelIdentity {
                id: Uuid::new_v4(),
                channel_type: channel_type.to_string(),
                external_id: external_id.to_string(),
                display_name: display_name.to_string(),
                user_id: None,
                created_at: now,
                updated_at: now,
            }
        });
        if !display_name.is_empty() && identity.display_name != display_name {
            identity.display_name = display_name.to_string();
            identity.updated_at = now;
        }
        identity.clone()
    }

    pub fn get(&self, id: Uuid) -> Option<ChannelIdentity> {
        self.by_key.read().values().find(|i| i.id == id).cloned()
    }

    pub fn find(&self, channel_type: &str, external_id: &str) -> Option<ChannelIdentity> {
        self.by_key
            .read()
            .get(&(channel_type.to_string(), external_id.to_string()))
            .cloned()
    }

    /// All identities linked to a user account.
    pub fn find_by_user(&self, user_id: Uuid) -> Vec<ChannelIdentity> {
        self.by_key
            .read()
            .values()
            .filter(|i| i.user_id == Some(user_id))
            .cloned()
            .collect()
    }

    /// Append-only link. Linking twice to the same user is a no-op;
    /// changing an existing link is a conflict.
    pub fn link_to_user(&self, identity_id: Uuid, user_id: Uuid) -> Result<ChannelIdentity> {
        let mut map = self.by_key.write();
        let identity = map
            .values_mut()
            .find(|i| i.id == identity_id)
            .ok_or_else(|| Error::NotFound(format!("channel identity {identity_id}")))?;

        match identity.user_id {
            Some(existing) if existing == user_id => Ok(identity.clone()),
            Some(existing) => Err(Error::Conflict(format!(
                "identity {identity_id} already linked to user {existing}"
            ))),
            None => {
                identity.user_id = Some(user_id);
                identity.updated_at = Utc::now();
                tracing::info!(%identity_id, %user_id, "channel identity linked to user");
                Ok(identity.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_is_idempotent_in_id() {
        let store = IdentityStore::new();
        let a = store.resolve("telegram", "tg_42", "Alice");
        let b = store.resolve("telegram", "tg_42", "Alice");
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn resolve_refreshes_display_name() {
        let store = IdentityStore::new();
        let a = store.resolve("telegram", "tg_42", "Alice");
        let b = store.resolve("telegram", "tg_42", "Alice Liddell");
        assert_eq!(a.id, b.id);
        assert_eq!(b.display_name, "Alice Liddell");
    }

    #[test]
    fn same_external_id_on_other_channel_is_distinct() {
        let store = IdentityStore::new();
        let tg = store.resolve("telegram", "42", "A");
        let dc = store.resolve("discord", "42", "A");
        assert_ne!(tg.id, dc.id);
    }

    #[test]
    fn link_is_append_only() {
        let store = IdentityStore::new();
        let identity = store.resolve("telegram", "tg_1", "A");
        let u1 = Uuid::new_v4();
        let u2 = Uuid::new_v4();

        store.link_to_user(identity.id, u1).unwrap();
        // Same user again: fine.
        store.link_to_user(identity.id, u1).unwrap();
        // Different user: rejected.
        let err = store.link_to_user(identity.id, u2).unwrap_err();
        assert_eq!(err.kind(), bh_domain::ErrorKind::Conflict);

        assert_eq!(store.get(identity.id).unwrap().user_id, Some(u1));
    }

    #[test]
    fn link_unknown_identity_is_not_found() {
        let store = IdentityStore::new();
        let err = store.link_to_user(Uuid::new_v4(), Uuid::new_v4()).unwrap_err();
        assert_eq!(err.kind(), bh_domain::ErrorKind::NotFound);
    }

    #[test]
    fn find_by_user_lists_linked_identities() {
        let store = IdentityStore::new();
        let user = Uuid::new_v4();
        let a = store.resolve("telegram", "1", "A");
        let _b = store.resolve("discord", "2", "B");
        store.link_to_user(a.id, user).unwrap();

        let linked = store.find_by_user(user);
        assert_eq!(linked.len(), 1);
        assert_eq!(linked[0].id, a.id);
    }
}

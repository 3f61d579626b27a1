//! Preauth keys — one-shot tokens that bind a platform identity to a
//! user account.
//!
//! A key is consumable at most once. Consumption is a single
//! compare-and-swap under the store's write lock, so two racing consumers
//! see exactly one success.

use std::collections::HashMap;

use bh_domain::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Token length: UUIDv4 in simple form (hyphens stripped), truncated.
const TOKEN_LEN: usize = 8;

pub const DEFAULT_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreauthKey {
    pub id: Uuid,
    /// 8-char lowercase hex. Case-sensitive compare, trimmed of whitespace.
    pub token: String,
    pub bot_id: Uuid,
    pub issued_by: Uuid,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl PreauthKey {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now && self.used_at.is_none()
    }
}

#[derive(Default)]
pub struct PreauthStore {
    keys: RwLock<HashMap<Uuid, PreauthKey>>,
}

impl PreauthStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a key for a bot. `ttl` of `None` uses the 24-hour default.
    pub fn issue(&self, bot_id: Uuid, issued_by: Uuid, ttl: Option<Duration>) -> PreauthKey {
        let now = Utc::now();
        let token = Uuid::new_v4().simple().to_string()[..TOKEN_LEN].to_string();
        let key = PreauthKey {
            id: Uuid::new_v4(),
            token,
            bot_id,
            issued_by,
            expires_at: now + ttl.unwrap_or_else(|| Duration::hours(DEFAULT_TTL_HOURS)),
            used_at: None,
            created_at: now,
        };
        self.keys.write().insert(key.id, key.clone());
        tracing::debug!(%bot_id, key_id = %key.id, "preauth key issued");
        key
    }

    /// Look a key up by token. Whitespace is trimmed; the compare itself
    /// is case-sensitive.
    pub fn get(&self, token: &str) -> Result<PreauthKey> {
        let token = token.trim();
        self.keys
            .read()
            .values()
            .find(|k| k.token == token)
            .cloned()
            .ok_or_else(|| Error::NotFound("preauth key".into()))
    }

    /// Set `used_at` once. Returns the row as it was *before* this call;
    /// marking an already-used key is a no-change and returns the used row.
    pub fn mark_used(&self, id: Uuid) -> Result<PreauthKey> {
        let mut keys = self.keys.write();
        let key = keys
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("preauth key {id}")))?;
        let prior = key.clone();
        if key.used_at.is_none() {
            key.used_at = Some(Utc::now());
        }
        Ok(prior)
    }

    /// Atomic consume: validity check and mark-used under one write lock.
    ///
    /// Errors: `NotFound` for an unknown token, `TokenExhausted` when the
    /// key is expired or was already consumed.
    pub fn consume(&self, token: &str, now: DateTime<Utc>) -> Result<PreauthKey> {
        let token = token.trim();
        let mut keys = self.keys.write();
        let key = keys
            .values_mut()
            .find(|k| k.token == token)
            .ok_or_else(|| Error::NotFound("preauth key".into()))?;

        if key.used_at.is_some() {
            return Err(Error::TokenExhausted("preauth key already used".into()));
        }
        if key.expires_at <= now {
            return Err(Error::TokenExhausted("preauth key expired".into()));
        }
        key.used_at = Some(now);
        Ok(key.clone())
    }
}

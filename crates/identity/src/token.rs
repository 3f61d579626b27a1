//! Schedule-scoped JWTs.
//!
//! Each schedule fire gets a short-lived HS256 token bound to the
//! schedule's owner. The validity window never drops below ten minutes so
//! a slow turn cannot outlive its own credential.

use bh_domain::{Error, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const MIN_TTL_MINUTES: i64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleClaims {
    pub sub: String,
    pub user_id: String,
    pub exp: usize,
}

pub struct ScheduleTokenIssuer {
    secret: String,
    ttl_minutes: i64,
}

impl ScheduleTokenIssuer {
    pub fn new(secret: impl Into<String>, ttl_minutes: u64) -> Self {
        Self {
            secret: secret.into(),
            ttl_minutes: (ttl_minutes as i64).max(MIN_TTL_MINUTES),
        }
    }

    /// Issue a token for the schedule owner.
    ///
    /// Refuses to sign with an empty secret (`Fatal` — misconfiguration)
    /// or for an empty subject (`Validation`).
    pub fn issue(&self, owner_user_id: Uuid) -> Result<String> {
        if self.secret.is_empty() {
            return Err(Error::Fatal("JWT secret is empty".into()));
        }
        let sub = owner_user_id.to_string();
        if owner_user_id.is_nil() {
            return Err(Error::Validation("token subject is empty".into()));
        }

        let exp = (Utc::now() + Duration::minutes(self.ttl_minutes)).timestamp() as usize;
        let claims = ScheduleClaims {
            sub: sub.clone(),
            user_id: sub,
            exp,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| Error::Fatal(format!("JWT signing failed: {e}")))
    }

    /// Verify a presented token and return its claims. Accepts the raw
    /// token or a `Bearer `-prefixed header value.
    pub fn verify(&self, token: &str) -> Result<ScheduleClaims> {
        if self.secret.is_empty() {
            return Err(Error::Fatal("JWT secret is empty".into()));
        }
        let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();
        decode::<ScheduleClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map(|data| data.claims)
        .map_err(|e| Error::TokenExhausted(format!("schedule token rejected: {e}")))
    }

    /// Format a token as an `Authorization` header value.
    pub fn bearer(token: &str) -> String {
        format!("Bearer {token}")
    }
}

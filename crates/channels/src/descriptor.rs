//! Channel types and the immutable per-type descriptor.

use bh_domain::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Canonical adapter configuration: a flat key-value map. Adapters define
/// the keys; the rest of the runtime treats it as opaque.
pub type ConfigMap = Map<String, Value>;

/// Closed set of channel types the runtime knows how to wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Telegram,
    Discord,
    Feishu,
    Cli,
    Web,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Telegram => "telegram",
            ChannelType::Discord => "discord",
            ChannelType::Feishu => "feishu",
            ChannelType::Cli => "cli",
            ChannelType::Web => "web",
        }
    }

    pub const ALL: [ChannelType; 5] = [
        ChannelType::Telegram,
        ChannelType::Discord,
        ChannelType::Feishu,
        ChannelType::Cli,
        ChannelType::Web,
    ];
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChannelType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "telegram" => Ok(ChannelType::Telegram),
            "discord" => Ok(ChannelType::Discord),
            "feishu" => Ok(ChannelType::Feishu),
            "cli" => Ok(ChannelType::Cli),
            "web" => Ok(ChannelType::Web),
            other => Err(Error::Validation(format!("unknown channel type: {other}"))),
        }
    }
}

/// What a platform can render.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Capabilities {
    pub text: bool,
    pub reply: bool,
    pub attachments: bool,
    /// Incremental per-message edits while the turn streams.
    pub streaming: bool,
    /// Whole-block updates (cards) instead of per-delta edits.
    pub block_streaming: bool,
}

/// Immutable metadata registered per channel type.
///
/// The normalizers are plain function pointers so descriptors stay `Copy`
/// -free but cheap to clone and impossible to mutate after registration.
#[derive(Clone)]
pub struct Descriptor {
    pub channel_type: ChannelType,
    pub display_name: &'static str,
    pub capabilities: Capabilities,
    /// True when the adapter needs no bot-level configuration (local CLI
    /// and web transports).
    pub configless: bool,
    /// Human-readable description of the outbound target format.
    pub target_spec: &'static str,
    /// Raw bot config → canonical map. Reports missing required keys.
    pub normalize_config: fn(&Value) -> Result<ConfigMap>,
    /// Raw per-user binding config → canonical map.
    pub normalize_user_config: fn(&Value) -> Result<ConfigMap>,
    /// Derive a user config from a resolved identity (external id +
    /// display name).
    pub user_config_from_identity: fn(external_id: &str, display_name: &str) -> ConfigMap,
    /// Validate/normalize an outbound target string.
    pub normalize_target: fn(&str) -> Result<String>,
}

impl std::fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Descriptor")
            .field("channel_type", &self.channel_type)
            .field("display_name", &self.display_name)
            .field("configless", &self.configless)
            .finish()
    }
}

// ── shared normalizer helpers ───────────────────────────────────────

/// Pull required string keys out of a raw config object into a canonical
/// map. Missing or non-string keys are validation errors.
pub(crate) fn require_string_keys(raw: &Value, keys: &[&str]) -> Result<ConfigMap> {
    let obj = raw
        .as_object()
        .ok_or_else(|| Error::Validation("config must be a table".into()))?;
    let mut canonical = ConfigMap::new();
    for key in keys {
        let value = obj
            .get(*key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Validation(format!("missing required config key: {key}")))?;
        canonical.insert((*key).to_string(), Value::String(value.to_string()));
    }
    Ok(canonical)
}

/// Copy optional string keys when present.
pub(crate) fn copy_optional_keys(raw: &Value, canonical: &mut ConfigMap, keys: &[&str]) {
    if let Some(obj) = raw.as_object() {
        for key in keys {
            if let Some(v) = obj.get(*key).and_then(Value::as_str) {
                let v = v.trim();
                if !v.is_empty() {
                    canonical.insert((*key).to_string(), Value::String(v.to_string()));
                }
            }
        }
    }
}

/// Case-insensitive compare of handle-like string attributes. Used by
/// binding lookups: every key present in `criteria` must match the
/// canonical config.
pub fn user_config_matches(canonical: &ConfigMap, criteria: &ConfigMap) -> bool {
    criteria.iter().all(|(key, wanted)| {
        match (canonical.get(key), wanted) {
            (Some(Value::String(have)), Value::String(want)) => have.eq_ignore_ascii_case(want),
            (Some(have), want) => have == want,
            (None, _) => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn channel_type_round_trips_as_str() {
        for ct in ChannelType::ALL {
            let parsed: ChannelType = ct.as_str().parse().unwrap();
            assert_eq!(parsed, ct);
        }
    }

    #[test]
    fn unknown_channel_type_is_validation_error() {
        let err = "matrix".parse::<ChannelType>().unwrap_err();
        assert_eq!(err.kind(), bh_domain::ErrorKind::Validation);
    }

    #[test]
    fn require_string_keys_reports_missing() {
        let raw = json!({ "bot_token": "t" });
        let err = require_string_keys(&raw, &["bot_token", "chat_id"]).unwrap_err();
        assert!(err.to_string().contains("chat_id"));
    }

    #[test]
    fn require_string_keys_trims_values() {
        let raw = json!({ "bot_token": "  t  " });
        let canonical = require_string_keys(&raw, &["bot_token"]).unwrap();
        assert_eq!(canonical["bot_token"], json!("t"));
    }

    #[test]
    fn user_config_match_is_case_insensitive_on_strings() {
        let mut canonical = ConfigMap::new();
        canonical.insert("username".into(), json!("Alice"));
        let mut criteria = ConfigMap::new();
        criteria.insert("username".into(), json!("alice"));
        assert!(user_config_matches(&canonical, &criteria));

        criteria.insert("missing".into(), json!("x"));
        assert!(!user_config_matches(&canonical, &criteria));
    }

    #[test]
    fn normalize_twice_is_fixed_point() {
        let raw = json!({ "bot_token": " tok ", "extra": 1 });
        let once = require_string_keys(&raw, &["bot_token"]).unwrap();
        let twice = require_string_keys(&Value::Object(once.clone()), &["bot_token"]).unwrap();
        assert_eq!(once, twice);
    }
}

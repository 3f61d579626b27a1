//! Bot model — the long-lived logical agent that owns schedules, memory,
//! channel bindings, and subagents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotType {
    /// Owner-only unless an identity is explicitly linked.
    Personal,
    /// Open to guests when the settings flag allows it.
    Public,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotStatus {
    Creating,
    Active,
    Deleting,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bot {
    pub id: Uuid,
    pub bot_type: BotType,
    pub status: BotStatus,
    pub owner_user_id: Uuid,
    pub name: String,
    /// Reply language hint injected into the system prompt.
    #[serde(default = "d_language")]
    pub language: String,
    /// Guest-access settings flag. Ignored for personal bots (the policy
    /// service forces it off).
    #[serde(default)]
    pub allow_guest: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn d_language() -> String {
    "en".into()
}

impl Bot {
    pub fn new(owner_user_id: Uuid, name: impl Into<String>, bot_type: BotType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            bot_type,
            status: BotStatus::Creating,
            owner_user_id,
            name: name.into(),
            language: d_language(),
            allow_guest: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == BotStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_bot_starts_creating() {
        let bot = Bot::new(Uuid::new_v4(), "helper", BotType::Public);
        assert_eq!(bot.status, BotStatus::Creating);
        assert!(!bot.is_active());
    }

    #[test]
    fn bot_type_serde_tags() {
        assert_eq!(
            serde_json::to_string(&BotType::Personal).unwrap(),
            "\"personal\""
        );
        assert_eq!(serde_json::to_string(&BotType::Public).unwrap(), "\"public\"");
    }

    #[test]
    fn deserializes_without_optional_fields() {
        let json = serde_json::json!({
            "id": Uuid::new_v4(),
            "bot_type": "public",
            "status": "active",
            "owner_user_id": Uuid::new_v4(),
            "name": "helper",
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z",
        });
        let bot: Bot = serde_json::from_value(json).unwrap();
        assert_eq!(bot.language, "en");
        assert!(!bot.allow_guest);
    }
}

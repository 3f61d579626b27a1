//! Schedule model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A cron-driven trigger owned by a bot.
///
/// Invariants: `current_calls <= max_calls` whenever `max_calls` is
/// bound, and a schedule whose quota is spent is disabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Uuid,
    pub bot_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// 5-field cron pattern: "minute hour dom month dow".
    pub pattern: String,
    /// The synthetic user command injected when the schedule fires.
    pub command: String,
    /// Optional call quota. `None` = unbounded.
    #[serde(default)]
    pub max_calls: Option<u32>,
    #[serde(default)]
    pub current_calls: u32,
    pub enabled: bool,
    pub owner_user_id: Uuid,
    /// Timezone for cron evaluation; invalid values fall back to UTC.
    #[serde(default = "d_tz")]
    pub timezone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_fired_at: Option<DateTime<Utc>>,
}

fn d_tz() -> String {
    "UTC".into()
}

impl Schedule {
    pub fn new(
        bot_id: Uuid,
        owner_user_id: Uuid,
        name: impl Into<String>,
        pattern: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            bot_id,
            name: name.into(),
            description: String::new(),
            pattern: pattern.into(),
            command: command.into(),
            max_calls: None,
            current_calls: 0,
            enabled: true,
            owner_user_id,
            timezone: d_tz(),
            created_at: now,
            updated_at: now,
            last_fired_at: None,
        }
    }

    pub fn quota_exhausted(&self) -> bool {
        matches!(self.max_calls, Some(max) if self.current_calls >= max)
    }
}

/// What the schedule engine hands the orchestrator on a fire.
#[derive(Debug, Clone, Serialize)]
pub struct TriggerPayload {
    pub schedule_id: Uuid,
    pub bot_id: Uuid,
    pub name: String,
    pub description: String,
    pub pattern: String,
    pub max_calls: Option<u32>,
    pub command: String,
    pub owner_user_id: Uuid,
}

impl From<&Schedule> for TriggerPayload {
    fn from(s: &Schedule) -> Self {
        Self {
            schedule_id: s.id,
            bot_id: s.bot_id,
            name: s.name.clone(),
            description: s.description.clone(),
            pattern: s.pattern.clone(),
            max_calls: s.max_calls,
            command: s.command.clone(),
            owner_user_id: s.owner_user_id,
        }
    }
}

impl TriggerPayload {
    /// The synthetic user message the orchestrator composes the turn from.
    pub fn to_user_message(&self) -> String {
        let mut msg = format!(
            "[Scheduled task \"{}\" fired (pattern: {})]",
            self.name, self.pattern
        );
        if !self.description.is_empty() {
            msg.push_str(&format!("\nDescription: {}", self.description));
        }
        msg.push_str(&format!("\n\n{}", self.command));
        msg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_exhaustion() {
        let mut s = Schedule::new(Uuid::new_v4(), Uuid::new_v4(), "ping", "* * * * *", "ping");
        assert!(!s.quota_exhausted(), "unbounded never exhausts");

        s.max_calls = Some(2);
        s.current_calls = 1;
        assert!(!s.quota_exhausted());
        s.current_calls = 2;
        assert!(s.quota_exhausted());
    }

    #[test]
    fn trigger_payload_message_includes_command() {
        let mut s = Schedule::new(Uuid::new_v4(), Uuid::new_v4(), "digest", "0 9 * * *", "summarize news");
        s.description = "morning digest".into();
        let payload = TriggerPayload::from(&s);
        let msg = payload.to_user_message();
        assert!(msg.contains("digest"));
        assert!(msg.contains("0 9 * * *"));
        assert!(msg.contains("morning digest"));
        assert!(msg.ends_with("summarize news"));
    }

    #[test]
    fn deserializes_without_optional_fields() {
        let json = serde_json::json!({
            "id": Uuid::new_v4(),
            "bot_id": Uuid::new_v4(),
            "name": "n",
            "pattern": "* * * * *",
            "command": "c",
            "enabled": true,
            "owner_user_id": Uuid::new_v4(),
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z",
        });
        let s: Schedule = serde_json::from_value(json).unwrap();
        assert_eq!(s.timezone, "UTC");
        assert!(s.max_calls.is_none());
        assert_eq!(s.current_calls, 0);
    }
}

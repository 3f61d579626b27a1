//! Persisted conversation messages.
//!
//! Messages are written only when a turn finalizes: the user message and
//! the assistant response land together, so a crashed turn leaves no
//! half-recorded exchange.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Text { text: String },
    Image { url: String },
    Attachment { name: String, url: String },
}

/// Token usage recorded on assistant messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub bot_id: Uuid,
    pub session_id: String,
    pub role: Role,
    pub blocks: Vec<Block>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn text(bot_id: Uuid, session_id: impl Into<String>, role: Role, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            bot_id,
            session_id: session_id.into(),
            role,
            blocks: vec![Block::Text { text: text.into() }],
            metadata: Map::new(),
            usage: None,
            created_at: Utc::now(),
        }
    }

    /// Join all text blocks into one string.
    pub fn text_content(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                Block::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_content_joins_text_blocks() {
        let mut msg = Message::text(Uuid::new_v4(), "s1", Role::Assistant, "hello");
        msg.blocks.push(Block::Image { url: "http://x/i.png".into() });
        msg.blocks.push(Block::Text { text: "world".into() });
        assert_eq!(msg.text_content(), "hello\nworld");
    }

    #[test]
    fn usage_accumulates() {
        let mut total = Usage::default();
        total.add(&Usage { input_tokens: 10, output_tokens: 5, total_tokens: 15 });
        total.add(&Usage { input_tokens: 1, output_tokens: 2, total_tokens: 3 });
        assert_eq!(total.total_tokens, 18);
    }

    #[test]
    fn serializes_without_empty_optionals() {
        let msg = Message::text(Uuid::new_v4(), "s1", Role::User, "hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("metadata").is_none());
        assert!(json.get("usage").is_none());
        assert_eq!(json["role"], "user");
    }
}

//! Normalized stream events emitted during a turn.
//!
//! Every producer (LLM gateway, tool loop, schedule trigger) and every
//! consumer (platform streams, the local route hub, the SSE endpoint)
//! speaks this union. Adapters map the variants they can render and
//! ignore the rest.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single event in a turn's outbound stream.
///
/// `metadata` rides along with any variant; the cross-channel mirror uses
/// it to stamp `source_channel` without touching the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(flatten)]
    pub body: EventBody,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventBody {
    /// Coarse lifecycle marker ("started", "working", ...).
    Status { state: String },

    AgentStart { agent: String },
    AgentEnd { agent: String },

    PhaseStart { phase: String },
    PhaseEnd { phase: String },

    ProcessingStarted,
    ProcessingCompleted,
    ProcessingFailed { message: String },

    TextStart,
    TextDelta { delta: String },
    TextEnd,

    ReasoningStart,
    ReasoningDelta { delta: String },
    ReasoningEnd,

    ToolCallStart {
        call_id: String,
        tool_name: String,
        arguments: Value,
    },
    ToolCallEnd {
        call_id: String,
        tool_name: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },

    ImageDelta { data: String },

    /// The complete assistant text. Exactly one `Final` or `Error` closes
    /// every accepted turn.
    Final { content: String },

    Error { message: String },
}

impl StreamEvent {
    pub fn new(body: EventBody) -> Self {
        Self {
            body,
            metadata: Map::new(),
        }
    }

    pub fn status(state: impl Into<String>) -> Self {
        Self::new(EventBody::Status { state: state.into() })
    }

    pub fn delta(delta: impl Into<String>) -> Self {
        Self::new(EventBody::TextDelta { delta: delta.into() })
    }

    pub fn final_text(content: impl Into<String>) -> Self {
        Self::new(EventBody::Final {
            content: content.into(),
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(EventBody::Error {
            message: message.into(),
        })
    }

    /// A `Final` or `Error` event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self.body, EventBody::Final { .. } | EventBody::Error { .. })
    }

    /// Return a copy carrying an extra metadata entry. The receiver owns
    /// the clone; the original event is untouched.
    pub fn with_metadata(&self, key: &str, value: Value) -> Self {
        let mut cloned = self.clone();
        cloned.metadata.insert(key.to_string(), value);
        cloned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_delta_serializes_with_tag() {
        let ev = StreamEvent::delta("hi");
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "text_delta");
        assert_eq!(json["delta"], "hi");
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn metadata_rides_flat_alongside_body() {
        let ev = StreamEvent::delta("hi").with_metadata("source_channel", "telegram".into());
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "text_delta");
        assert_eq!(json["metadata"]["source_channel"], "telegram");
    }

    #[test]
    fn with_metadata_leaves_original_untouched() {
        let original = StreamEvent::delta("hi");
        let _stamped = original.with_metadata("source_channel", "discord".into());
        assert!(original.metadata.is_empty());
    }

    #[test]
    fn terminal_detection() {
        assert!(StreamEvent::final_text("done").is_terminal());
        assert!(StreamEvent::error("boom").is_terminal());
        assert!(!StreamEvent::delta("x").is_terminal());
        assert!(!StreamEvent::new(EventBody::ProcessingFailed { message: "x".into() }).is_terminal());
    }

    #[test]
    fn round_trips_through_json() {
        let ev = StreamEvent::new(EventBody::ToolCallEnd {
            call_id: "c1".into(),
            tool_name: "web_search".into(),
            content: "results".into(),
            is_error: false,
        });
        let json = serde_json::to_string(&ev).unwrap();
        let back: StreamEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.body, ev.body);
    }

    #[test]
    fn tool_call_end_omits_false_error_flag() {
        let ev = StreamEvent::new(EventBody::ToolCallEnd {
            call_id: "c1".into(),
            tool_name: "t".into(),
            content: "ok".into(),
            is_error: false,
        });
        let json = serde_json::to_value(&ev).unwrap();
        assert!(json.get("is_error").is_none());
    }
}

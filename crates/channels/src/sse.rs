//! Outbound SSE wire format.
//!
//! Each event is one JSON object on a single `data:` line; `[DONE]` marks
//! the end of a stream. Readers must survive anything a proxy or older
//! writer can produce: plain text, JSON, and double-encoded JSON all
//! decode without error.

use bh_domain::stream::StreamEvent;
use serde_json::Value;

pub const DONE_MARKER: &str = "[DONE]";

/// Serialize an event as a single `data:` line.
pub fn encode_event(event: &StreamEvent) -> String {
    // StreamEvent serialization cannot fail: every field is serde-plain.
    let json = serde_json::to_string(event).unwrap_or_else(|_| "{}".into());
    format!("data: {json}\n\n")
}

/// The stream-end marker line.
pub fn encode_done() -> String {
    format!("data: {DONE_MARKER}\n\n")
}

/// What a decoded `data:` payload turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum SsePayload {
    /// The `[DONE]` end marker.
    Done,
    /// A structured stream event.
    Event(StreamEvent),
    /// Anything that isn't a stream event; delivered verbatim.
    Text(String),
    /// Blank line; skip.
    Empty,
}

/// Decode one `data:` payload. Never fails: unknown shapes fall back to
/// [`SsePayload::Text`].
pub fn decode_payload(payload: &str) -> SsePayload {
    let payload = payload.trim();
    if payload.is_empty() {
        return SsePayload::Empty;
    }
    if payload == DONE_MARKER {
        return SsePayload::Done;
    }

    match serde_json::from_str::<Value>(payload) {
        // Double-encoded: a JSON string whose contents are themselves JSON.
        Ok(Value::String(inner)) => match serde_json::from_str::<StreamEvent>(&inner) {
            Ok(event) => SsePayload::Event(event),
            Err(_) => SsePayload::Text(inner),
        },
        Ok(value) => match serde_json::from_value::<StreamEvent>(value) {
            Ok(event) => SsePayload::Event(event),
            Err(_) => SsePayload::Text(payload.to_string()),
        },
        Err(_) => SsePayload::Text(payload.to_string()),
    }
}

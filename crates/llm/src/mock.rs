//! Scriptable in-process LLM client for tests and local dry runs.

use std::collections::VecDeque;

use bh_domain::message::Usage;
use bh_domain::{Error, Result};
use parking_lot::Mutex;

use crate::client::{BoxStream, ChatRequest, LlmClient, LlmEvent, ProviderKind, ToolCall};

/// One scripted reply: the events to stream for a single `chat_stream`
/// call, in order.
pub type Script = Vec<Result<LlmEvent>>;

/// An [`LlmClient`] that plays back queued scripts.
///
/// When the queue is empty it echoes the last user message as a plain
/// text completion, which keeps happy-path tests terse.
pub struct MockLlm {
    scripts: Mutex<VecDeque<Script>>,
}

impl Default for MockLlm {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlm {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue a script for the next call.
    pub fn push_script(&self, script: Script) {
        self.scripts.lock().push_back(script);
    }

    /// Script a plain text reply streamed as two deltas.
    pub fn push_text(&self, text: &str) {
        let mid = text.len() / 2;
        let mid = (0..=mid)
            .rev()
            .find(|i| text.is_char_boundary(*i))
            .unwrap_or(0);
        let (a, b) = text.split_at(mid);
        self.push_script(vec![
            Ok(LlmEvent::TextStart),
            Ok(LlmEvent::TextDelta { delta: a.to_string() }),
            Ok(LlmEvent::TextDelta { delta: b.to_string() }),
            Ok(LlmEvent::TextEnd),
            Ok(LlmEvent::Done {
                usage: Some(Usage {
                    input_tokens: 10,
                    output_tokens: text.len() as u32,
                    total_tokens: 10 + text.len() as u32,
                }),
            }),
        ]);
    }

    /// Script a single tool call followed by nothing (the next queued
    /// script answers the follow-up completion).
    pub fn push_tool_call(&self, call_id: &str, tool_name: &str, arguments: serde_json::Value) {
        self.push_script(vec![
            Ok(LlmEvent::ToolCallStart {
                call_id: call_id.to_string(),
                tool_name: tool_name.to_string(),
            }),
            Ok(LlmEvent::ToolCallEnd {
                call_id: call_id.to_string(),
                tool_name: tool_name.to_string(),
                arguments,
            }),
            Ok(LlmEvent::Done { usage: None }),
        ]);
    }

    /// Script a mid-stream transient failure (upstream 5xx).
    pub fn push_transient_failure(&self, prefix: &str, message: &str) {
        self.push_script(vec![
            Ok(LlmEvent::TextStart),
            Ok(LlmEvent::TextDelta { delta: prefix.to_string() }),
            Err(Error::Transient(message.to_string())),
        ]);
    }
}

#[async_trait::async_trait]
impl LlmClient for MockLlm {
    async fn chat_stream(&self, req: &ChatRequest) -> Result<BoxStream<'static, Result<LlmEvent>>> {
        let script = self.scripts.lock().pop_front().unwrap_or_else(|| {
            let echo = req
                .messages
                .iter()
                .rev()
                .find(|m| matches!(m.role, crate::client::ChatRole::User))
                .map(|m| m.content.clone())
                .unwrap_or_default();
            vec![
                Ok(LlmEvent::TextStart),
                Ok(LlmEvent::TextDelta { delta: echo }),
                Ok(LlmEvent::TextEnd),
                Ok(LlmEvent::Done { usage: None }),
            ]
        });

        let stream = async_stream::stream! {
            for event in script {
                yield event;
            }
        };
        Ok(Box::pin(stream))
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenaiCompletions
    }
}

/// Collect assembled tool calls out of a finished event list (test helper).
pub fn tool_calls_of(events: &[LlmEvent]) -> Vec<ToolCall> {
    events
        .iter()
        .filter_map(|e| match e {
            LlmEvent::ToolCallEnd {
                call_id,
                tool_name,
                arguments,
            } => Some(ToolCall {
                call_id: call_id.clone(),
                tool_name: tool_name.clone(),
                arguments: arguments.clone(),
            }),
            _ => None,
        })
        .collect()
}

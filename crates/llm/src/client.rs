//! Provider-agnostic chat types and the [`LlmClient`] trait.

use bh_domain::message::Usage;
use bh_domain::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// The canonical client families a gateway may route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    OpenaiResponses,
    OpenaiCompletions,
    AnthropicMessages,
    GoogleGenerativeAi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One turn of conversation sent to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    /// Tool calls the assistant emitted (assistant messages only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// The call this message answers (tool messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::System, content)
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::User, content)
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::Assistant, content)
    }
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }

    fn plain(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
}

/// Tool definition exposed to the model (name + JSON-Schema parameters).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: Option<u32>,
}

/// Events produced while a completion streams.
///
/// Transport and provider failures travel as `Err(Error::Transient(..))`
/// items in the stream, not as a variant here.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmEvent {
    TextStart,
    TextDelta { delta: String },
    TextEnd,
    ReasoningStart,
    ReasoningDelta { delta: String },
    ReasoningEnd,
    ToolCallStart { call_id: String, tool_name: String },
    ToolCallDelta { call_id: String, delta: String },
    ToolCallEnd { call_id: String, tool_name: String, arguments: Value },
    ImageDelta { data: String },
    Done { usage: Option<Usage> },
}

/// Trait every LLM gateway adapter implements.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    /// Stream one completion. The stream ends after `Done` or an `Err`.
    async fn chat_stream(&self, req: &ChatRequest) -> Result<BoxStream<'static, Result<LlmEvent>>>;

    /// Which client family this adapter speaks.
    fn kind(&self) -> ProviderKind;
}

//! LLM gateway contract.
//!
//! The runtime core never talks to a model SDK directly: it sees the
//! [`LlmClient`] trait, a provider-agnostic request shape, and a stream of
//! [`LlmEvent`]s. Concrete provider adapters live behind this seam (and
//! outside this workspace); [`MockLlm`] ships here for local mode and tests.

pub mod client;
pub mod mock;
pub mod sse;

pub use client::{
    BoxStream, ChatMessage, ChatRequest, ChatRole, LlmClient, LlmEvent, ProviderKind, ToolCall,
    ToolDefinition,
};
pub use mock::MockLlm;

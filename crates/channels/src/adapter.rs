//! Adapter capability contracts.
//!
//! `Sender` is the one required contract; `StreamSender`, `InboundSource`
//! and `DirectoryAdapter` are optional capabilities the registry exposes
//! when an adapter implements them.

use async_trait::async_trait;
use bh_domain::stream::{EventBody, StreamEvent};
use bh_domain::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::descriptor::{user_config_matches, ChannelType, ConfigMap};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attachment {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

/// A fully-formed outbound message handed to `Sender::send`.
#[derive(Debug, Clone, Default)]
pub struct OutboundMessage {
    pub text: String,
    /// Platform message id to reply to, honored where the capability flag
    /// is set.
    pub reply_to: Option<String>,
    pub attachments: Vec<Attachment>,
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// A normalized event produced by an adapter's inbound path.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub channel: ChannelType,
    /// Stable platform account id of the sender.
    pub external_id: String,
    pub display_name: String,
    /// Adapter-shaped criteria used to match a bot binding.
    pub user_config: ConfigMap,
    pub session_id: String,
    pub text: String,
    pub attachments: Vec<Attachment>,
    /// Platform message id for reply threading.
    pub reply_target: Option<String>,
    /// One-shot linking token, if the message carried one.
    pub preauth_token: Option<String>,
    /// Platform-unique id for dedupe.
    pub event_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    /// Reply target to anchor the placeholder message to.
    pub reply_to: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Capability traits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Required contract: fire-and-forget outbound send.
#[async_trait]
pub trait Sender: Send + Sync {
    fn channel_type(&self) -> ChannelType;

    /// Send one message. Transient platform failures (429/5xx, timeouts)
    /// surface as `Error::Transient`; everything else is permanent.
    async fn send(&self, config: &ConfigMap, target: &str, msg: &OutboundMessage) -> Result<()>;

    /// Binding lookup: does this canonical user config match the criteria?
    /// The default compares shared keys with case-insensitive handles.
    fn matches_user_config(&self, canonical: &ConfigMap, criteria: &ConfigMap) -> bool {
        user_config_matches(canonical, criteria)
    }
}

/// Optional: incremental outbound streaming.
#[async_trait]
pub trait StreamSender: Send + Sync {
    async fn open_stream(
        &self,
        config: &ConfigMap,
        target: &str,
        options: StreamOptions,
    ) -> Result<Box<dyn OutboundStream>>;
}

/// A live outbound stream. Push maps stream events to platform
/// primitives; close is idempotent and pushes after close fail with a
/// conflict.
#[async_trait]
pub trait OutboundStream: Send {
    async fn push(&mut self, event: StreamEvent) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

/// Optional: adapters that produce their own inbound events (long-poll,
/// gateway websocket). The returned future runs until cancelled.
#[async_trait]
pub trait InboundSource: Send + Sync {
    async fn run(&self, config: ConfigMap, tx: mpsc::Sender<InboundEvent>) -> Result<()>;
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectoryEntry {
    pub id: String,
    pub name: String,
}

/// Optional: enumerate reachable targets (chats, channels) for a config.
#[async_trait]
pub trait DirectoryAdapter: Send + Sync {
    async fn list_targets(&self, config: &ConfigMap) -> Result<Vec<DirectoryEntry>>;
}

pub(crate) fn closed_stream_error() -> Error {
    Error::Conflict("stream is closed".into())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// BufferedStream — fallback for adapters without native streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Wraps a plain [`Sender`] as an [`OutboundStream`]: deltas accumulate
/// in memory and one message goes out on `final` (or an error banner on
/// `error`). Intermediate status events are no-ops.
pub struct BufferedStream {
    sender: Arc<dyn Sender>,
    config: ConfigMap,
    target: String,
    reply_to: Option<String>,
    buffer: String,
    closed: bool,
}

impl BufferedStream {
    pub fn new(
        sender: Arc<dyn Sender>,
        config: ConfigMap,
        target: String,
        options: StreamOptions,
    ) -> Self {
        Self {
            sender,
            config,
            target,
            reply_to: options.reply_to,
            buffer: String::new(),
            closed: false,
        }
    }
}

#[async_trait]
impl OutboundStream for BufferedStream {
    async fn push(&mut self, event: StreamEvent) -> Result<()> {
        if self.closed {
            return Err(closed_stream_error());
        }
        match event.body {
            EventBody::TextDelta { delta } => {
                self.buffer.push_str(&delta);
                Ok(())
            }
            EventBody::Final { content } => {
                let text = if content.is_empty() {
                    std::mem::take(&mut self.buffer)
                } else {
                    content
                };
                let msg = OutboundMessage {
                    text,
                    reply_to: self.reply_to.clone(),
                    attachments: Vec::new(),
                };
                self.sender.send(&self.config, &self.target, &msg).await
            }
            EventBody::Error { message } => {
                let msg = OutboundMessage::text(format!("Error: {message}"));
                self.sender.send(&self.config, &self.target, &msg).await
            }
            _ => Ok(()),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct RecordingSender {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Sender for RecordingSender {
        fn channel_type(&self) -> ChannelType {
            ChannelType::Feishu
        }

        async fn send(&self, _: &ConfigMap, _: &str, msg: &OutboundMessage) -> Result<()> {
            self.sent.lock().push(msg.text.clone());
            Ok(())
        }
    }

    fn buffered() -> (Arc<RecordingSender>, BufferedStream) {
        let sender = Arc::new(RecordingSender {
            sent: Mutex::new(Vec::new()),
        });
        let stream = BufferedStream::new(
            sender.clone(),
            ConfigMap::new(),
            "chat-1".into(),
            StreamOptions::default(),
        );
        (sender, stream)
    }

    #[tokio::test]
    async fn buffered_stream_sends_once_on_final() {
        let (sender, mut stream) = buffered();
        stream.push(StreamEvent::delta("hel")).await.unwrap();
        stream.push(StreamEvent::delta("lo")).await.unwrap();
        stream.push(StreamEvent::status("working")).await.unwrap();
        stream.push(StreamEvent::final_text("hello")).await.unwrap();

        assert_eq!(*sender.sent.lock(), vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn buffered_stream_falls_back_to_accumulated_deltas() {
        let (sender, mut stream) = buffered();
        stream.push(StreamEvent::delta("ab")).await.unwrap();
        stream.push(StreamEvent::delta("cd")).await.unwrap();
        stream.push(StreamEvent::final_text("")).await.unwrap();

        assert_eq!(*sender.sent.lock(), vec!["abcd".to_string()]);
    }

    #[tokio::test]
    async fn buffered_stream_renders_error_banner() {
        let (sender, mut stream) = buffered();
        stream.push(StreamEvent::error("llm unavailable")).await.unwrap();
        assert_eq!(*sender.sent.lock(), vec!["Error: llm unavailable".to_string()]);
    }

    #[tokio::test]
    async fn push_after_close_is_conflict() {
        let (_, mut stream) = buffered();
        stream.close().await.unwrap();
        // Close twice: idempotent.
        stream.close().await.unwrap();
        let err = stream.push(StreamEvent::delta("x")).await.unwrap_err();
        assert_eq!(err.kind(), bh_domain::ErrorKind::Conflict);
    }
}

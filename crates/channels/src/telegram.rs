//! Telegram adapter — Bot API over HTTPS.
//!
//! Long finals split at the 4096-char message limit. Streaming reserves a
//! placeholder with `sendMessage` and coalesces `editMessageText` calls
//! to at most one per second. Attachment upload goes through
//! `sendDocument` with a URL; the bytes themselves never pass through the
//! runtime.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bh_domain::stream::{EventBody, StreamEvent};
use bh_domain::{Error, Result};
use serde_json::{json, Value};

use crate::adapter::{
    closed_stream_error, OutboundMessage, OutboundStream, Sender, StreamOptions, StreamSender,
};
use crate::descriptor::{
    copy_optional_keys, require_string_keys, Capabilities, ChannelType, ConfigMap, Descriptor,
};
use crate::text::split_reply;
use crate::wire::{classify_status, from_reqwest};

pub const MAX_MESSAGE_LEN: usize = 4096;
pub const EDIT_INTERVAL: Duration = Duration::from_secs(1);
const PLACEHOLDER: &str = "Thinking…";

pub struct TelegramAdapter {
    http: reqwest::Client,
}

impl Default for TelegramAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl TelegramAdapter {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    pub fn descriptor() -> Descriptor {
        Descriptor {
            channel_type: ChannelType::Telegram,
            display_name: "Telegram",
            capabilities: Capabilities {
                text: true,
                reply: true,
                attachments: true,
                streaming: true,
                block_streaming: false,
            },
            configless: false,
            target_spec: "chat id (numeric, possibly negative) or @channelname",
            normalize_config: |raw| require_string_keys(raw, &["bot_token"]),
            normalize_user_config: |raw| {
                let mut canonical = require_string_keys(raw, &["user_id"])?;
                copy_optional_keys(raw, &mut canonical, &["username"]);
                Ok(canonical)
            },
            user_config_from_identity: |external_id, display_name| {
                let mut map = ConfigMap::new();
                map.insert("user_id".into(), Value::String(external_id.to_string()));
                if !display_name.is_empty() {
                    map.insert("username".into(), Value::String(display_name.to_string()));
                }
                map
            },
            normalize_target: |target| {
                let target = target.trim();
                let numeric = target
                    .strip_prefix('-')
                    .unwrap_or(target)
                    .chars()
                    .all(|c| c.is_ascii_digit())
                    && !target.trim_start_matches('-').is_empty();
                let channel = target.starts_with('@') && target.len() > 1;
                if numeric || channel {
                    Ok(target.to_string())
                } else {
                    Err(Error::Validation(format!(
                        "telegram target must be a chat id or @channelname, got {target:?}"
                    )))
                }
            },
        }
    }

    fn token(config: &ConfigMap) -> Result<&str> {
        config
            .get("bot_token")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Validation("telegram config missing bot_token".into()))
    }

    async fn call(&self, token: &str, method: &str, body: Value) -> Result<Value> {
        let resp = self
            .http
            .post(format!("https://api.telegram.org/bot{token}/{method}"))
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status("telegram", status, &body));
        }
        let envelope: Value = resp.json().await.map_err(from_reqwest)?;
        if envelope.get("ok").and_then(Value::as_bool) != Some(true) {
            return Err(Error::Http(format!("telegram API error: {envelope}")));
        }
        Ok(envelope["result"].clone())
    }

    async fn send_text(
        &self,
        token: &str,
        chat_id: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> Result<i64> {
        let mut body = json!({ "chat_id": chat_id, "text": text });
        if let Some(message_id) = reply_to.and_then(|m| m.parse::<i64>().ok()) {
            body["reply_parameters"] = json!({ "message_id": message_id });
        }
        let result = self.call(token, "sendMessage", body).await?;
        result
            .get("message_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::Http("telegram sendMessage missing message_id".into()))
    }

    async fn edit_text(&self, token: &str, chat_id: &str, message_id: i64, text: &str) -> Result<()> {
        self.call(
            token,
            "editMessageText",
            json!({ "chat_id": chat_id, "message_id": message_id, "text": text }),
        )
        .await?;
        Ok(())
    }

    async fn send_document(&self, token: &str, chat_id: &str, name: &str, url: &str) -> Result<()> {
        self.call(
            token,
            "sendDocument",
            json!({ "chat_id": chat_id, "document": url, "caption": name }),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Sender for TelegramAdapter {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Telegram
    }

    async fn send(&self, config: &ConfigMap, target: &str, msg: &OutboundMessage) -> Result<()> {
        let token = Self::token(config)?;
        let mut reply_to = msg.reply_to.as_deref();
        for chunk in split_reply(&msg.text, MAX_MESSAGE_LEN) {
            self.send_text(token, target, &chunk, reply_to).await?;
            reply_to = None; // only the first chunk anchors to the reply
        }
        for attachment in &msg.attachments {
            self.send_document(token, target, &attachment.name, &attachment.url)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StreamSender for TelegramAdapter {
    async fn open_stream(
        &self,
        config: &ConfigMap,
        target: &str,
        options: StreamOptions,
    ) -> Result<Box<dyn OutboundStream>> {
        let token = Self::token(config)?.to_string();
        Ok(Box::new(TelegramStream {
            adapter: TelegramAdapter {
                http: self.http.clone(),
            },
            token,
            chat_id: target.to_string(),
            reply_to: options.reply_to,
            message_id: None,
            buffer: String::new(),
            last_edit: None,
            closed: false,
        }))
    }
}

struct TelegramStream {
    adapter: TelegramAdapter,
    token: String,
    chat_id: String,
    reply_to: Option<String>,
    message_id: Option<i64>,
    buffer: String,
    last_edit: Option<Instant>,
    closed: bool,
}

impl TelegramStream {
    fn edit_due(&self, now: Instant) -> bool {
        match self.last_edit {
            None => true,
            Some(at) => now.duration_since(at) >= EDIT_INTERVAL,
        }
    }

    async fn flush(&mut self, text: &str) -> Result<()> {
        // Edits cap at one message; overflow is delivered by the final
        // send path splitting into fresh messages.
        let visible: String = text.chars().take(MAX_MESSAGE_LEN).collect();
        match self.message_id {
            Some(id) => {
                self.adapter
                    .edit_text(&self.token, &self.chat_id, id, &visible)
                    .await?;
            }
            None => {
                let id = self
                    .adapter
                    .send_text(&self.token, &self.chat_id, &visible, self.reply_to.as_deref())
                    .await?;
                self.message_id = Some(id);
            }
        }
        self.last_edit = Some(Instant::now());
        Ok(())
    }
}

#[async_trait]
impl OutboundStream for TelegramStream {
    async fn push(&mut self, event: StreamEvent) -> Result<()> {
        if self.closed {
            return Err(closed_stream_error());
        }
        match event.body {
            EventBody::Status { ref state } if state == "started" => {
                if self.message_id.is_none() {
                    self.flush(PLACEHOLDER).await?;
                }
                Ok(())
            }
            EventBody::TextDelta { delta } => {
                self.buffer.push_str(&delta);
                if self.edit_due(Instant::now()) {
                    let snapshot = self.buffer.clone();
                    self.flush(&snapshot).await?;
                }
                Ok(())
            }
            EventBody::Final { content } => {
                let text = if content.is_empty() {
                    self.buffer.clone()
                } else {
                    content
                };
                self.flush(&text).await
            }
            EventBody::Error { message } => self.flush(&format!("Error: {message}")).await,
            _ => Ok(()),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
